use std::{fmt, ops};

/// A set of poll readiness flags, mechanism-independent.
///
/// Each backend (`epoll`, `kqueue`, event ports, `poll()`) translates its own
/// native event representation into this set, and translates it back when
/// registering interest. `Ready` values combine with the usual bitwise
/// operators.
///
/// ```
/// use commio::Ready;
///
/// let ready = Ready::readable() | Ready::writable();
/// assert!(ready.is_readable());
/// assert!(ready.is_writable());
/// ```
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Ready(usize);

const READABLE: usize = 0b0_0000_0001;
const WRITABLE: usize = 0b0_0000_0010;
const ERROR: usize = 0b0_0000_0100;
const HUP: usize = 0b0_0000_1000;
const READ_HANGUP: usize = 0b0_0001_0000;
const INVALID: usize = 0b0_0010_0000;
const READY_ALL: usize = READABLE | WRITABLE | ERROR | HUP | READ_HANGUP | INVALID;

impl Ready {
    pub fn empty() -> Ready {
        Ready(0)
    }

    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    pub fn error() -> Ready {
        Ready(ERROR)
    }

    pub fn hup() -> Ready {
        Ready(HUP)
    }

    /// Peer performed a half-close (`EPOLLRDHUP` / `POLLRDHUP`).
    pub fn read_hangup() -> Ready {
        Ready(READ_HANGUP)
    }

    /// File descriptor is no longer valid for polling (e.g. closed under us).
    pub fn invalid() -> Ready {
        Ready(INVALID)
    }

    pub fn all() -> Ready {
        Ready(READY_ALL)
    }

    pub fn is_empty(&self) -> bool {
        *self == Ready::empty()
    }

    pub fn is_readable(&self) -> bool {
        self.contains(Ready::readable())
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Ready::writable())
    }

    pub fn is_error(&self) -> bool {
        self.contains(Ready::error())
    }

    pub fn is_hup(&self) -> bool {
        self.contains(Ready::hup())
    }

    pub fn is_read_hangup(&self) -> bool {
        self.contains(Ready::read_hangup())
    }

    pub fn is_invalid(&self) -> bool {
        self.contains(Ready::invalid())
    }

    /// True for any of the conditions that a handler should treat as fatal:
    /// error, hangup or invalidation.
    pub fn is_fatal(&self) -> bool {
        self.is_error() || self.is_hup() || self.is_invalid()
    }

    pub fn insert(&mut self, other: Ready) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }

    pub fn contains(&self, other: Ready) -> bool {
        (*self & other) == other
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn from_usize(val: usize) -> Ready {
        Ready(val & READY_ALL)
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl ops::Sub for Ready {
    type Output = Ready;
    fn sub(self, other: Ready) -> Ready {
        Ready(self.0 & !other.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = f.debug_set();
        if self.is_readable() {
            flags.entry(&"READABLE");
        }
        if self.is_writable() {
            flags.entry(&"WRITABLE");
        }
        if self.is_error() {
            flags.entry(&"ERROR");
        }
        if self.is_hup() {
            flags.entry(&"HUP");
        }
        if self.is_read_hangup() {
            flags.entry(&"READ_HANGUP");
        }
        if self.is_invalid() {
            flags.entry(&"INVALID");
        }
        flags.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Ready;

    #[test]
    fn combine_and_query() {
        let r = Ready::readable() | Ready::writable();
        assert!(r.is_readable());
        assert!(r.is_writable());
        assert!(!r.is_error());
    }

    #[test]
    fn fatal_flags() {
        assert!(Ready::error().is_fatal());
        assert!(Ready::hup().is_fatal());
        assert!(Ready::invalid().is_fatal());
        assert!(!Ready::readable().is_fatal());
    }

    #[test]
    fn remove_clears_only_target_bit() {
        let mut r = Ready::readable() | Ready::writable();
        r.remove(Ready::writable());
        assert!(r.is_readable());
        assert!(!r.is_writable());
    }
}
