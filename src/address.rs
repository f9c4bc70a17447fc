use std::fmt;
use std::net::SocketAddrV4;

/// Destination of a send/connect/listen call: either a concrete inet
/// endpoint or an indirection through a logical proxy name resolved at
/// send time by the `ProxyMap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommAddress {
    Inet(SocketAddrV4),
    Proxy(String),
}

impl CommAddress {
    pub fn inet(addr: SocketAddrV4) -> CommAddress {
        CommAddress::Inet(addr)
    }

    pub fn proxy<S: Into<String>>(name: S) -> CommAddress {
        CommAddress::Proxy(name.into())
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, CommAddress::Proxy(_))
    }

    pub fn as_inet(&self) -> Option<SocketAddrV4> {
        match self {
            CommAddress::Inet(addr) => Some(*addr),
            CommAddress::Proxy(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&str> {
        match self {
            CommAddress::Proxy(name) => Some(name.as_str()),
            CommAddress::Inet(_) => None,
        }
    }
}

impl fmt::Display for CommAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommAddress::Inet(addr) => write!(f, "{}", addr),
            CommAddress::Proxy(name) => write!(f, "proxy:{}", name),
        }
    }
}

impl From<SocketAddrV4> for CommAddress {
    fn from(addr: SocketAddrV4) -> CommAddress {
        CommAddress::Inet(addr)
    }
}
