use std::collections::HashMap;
use std::net::SocketAddrV4;

use crate::error::{CommError, CommResult};

/// One entry of the proxy name table: a logical name resolving to a
/// hostname and the inet address currently serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub hostname: String,
    pub addr: SocketAddrV4,
}

/// Difference between an old and new whole-table proxy map, used to decide
/// which existing connections must be torn down (their proxy moved to a
/// different address) and which proxies are newly known.
#[derive(Debug, Default)]
pub struct ProxyMapDiff {
    pub invalidated: Vec<(String, SocketAddrV4)>,
    pub new: Vec<(String, ProxyEntry)>,
}

/// Logical-name to inet-address indirection table. The whole table is
/// replaced atomically on update (`ProxyMap::update`), matching
/// `HandlerMap::update_proxy_map`'s all-or-nothing replace-and-diff
/// behavior rather than incremental per-entry edits.
#[derive(Default)]
pub struct ProxyMap {
    entries: HashMap<String, ProxyEntry>,
}

impl ProxyMap {
    pub fn new() -> ProxyMap {
        ProxyMap::default()
    }

    pub fn get(&self, proxy: &str) -> Option<SocketAddrV4> {
        self.entries.get(proxy).map(|e| e.addr)
    }

    pub fn add(&mut self, proxy: String, hostname: String, addr: SocketAddrV4) {
        self.entries.insert(proxy, ProxyEntry { hostname, addr });
    }

    pub fn snapshot(&self) -> HashMap<String, ProxyEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the whole table with `mappings`, returning the diff so the
    /// caller can invalidate stale connections and gossip the change.
    pub fn update(&mut self, mappings: HashMap<String, ProxyEntry>) -> ProxyMapDiff {
        let mut diff = ProxyMapDiff::default();

        for (proxy, old) in &self.entries {
            match mappings.get(proxy) {
                Some(new) if new.addr != old.addr => {
                    diff.invalidated.push((proxy.clone(), old.addr));
                }
                None => diff.invalidated.push((proxy.clone(), old.addr)),
                _ => {}
            }
        }

        for (proxy, entry) in &mappings {
            if self.entries.get(proxy) != Some(entry) {
                diff.new.push((proxy.clone(), entry.clone()));
            }
        }

        self.entries = mappings;
        diff
    }
}

/// Serializes a proxy table as one line per entry (`name\thostname\tip:port`),
/// the payload carried by a `PROXY_MAP_UPDATE`-flagged message. Names and
/// hostnames are internal identifiers and never contain tabs or newlines.
pub fn encode_proxy_map(entries: &HashMap<String, ProxyEntry>) -> Vec<u8> {
    let mut out = String::new();
    for (proxy, entry) in entries {
        out.push_str(proxy);
        out.push('\t');
        out.push_str(&entry.hostname);
        out.push('\t');
        out.push_str(&entry.addr.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Parses the payload produced by `encode_proxy_map`.
pub fn decode_proxy_map(payload: &[u8]) -> CommResult<HashMap<String, ProxyEntry>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| CommError::ReceiveError("proxy map payload not utf-8".into()))?;
    let mut entries = HashMap::new();
    for line in text.lines() {
        let mut fields = line.splitn(3, '\t');
        let proxy = fields.next().ok_or_else(|| CommError::ReceiveError("malformed proxy map line".into()))?;
        let hostname = fields.next().ok_or_else(|| CommError::ReceiveError("malformed proxy map line".into()))?;
        let addr = fields
            .next()
            .ok_or_else(|| CommError::ReceiveError("malformed proxy map line".into()))?
            .parse::<SocketAddrV4>()
            .map_err(|e| CommError::ReceiveError(format!("bad proxy map address: {e}")))?;
        entries.insert(proxy.to_string(), ProxyEntry { hostname: hostname.to_string(), addr });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn add_and_get() {
        let mut map = ProxyMap::new();
        map.add("rs1".into(), "host1".into(), addr(10001));
        assert_eq!(map.get("rs1"), Some(addr(10001)));
        assert_eq!(map.get("rs2"), None);
    }

    #[test]
    fn update_diffs_moved_and_new_entries() {
        let mut map = ProxyMap::new();
        map.add("rs1".into(), "host1".into(), addr(10001));

        let mut next = HashMap::new();
        next.insert(
            "rs1".to_string(),
            ProxyEntry { hostname: "host1".into(), addr: addr(10002) },
        );
        next.insert(
            "rs2".to_string(),
            ProxyEntry { hostname: "host2".into(), addr: addr(10003) },
        );

        let diff = map.update(next);
        assert_eq!(diff.invalidated, vec![("rs1".to_string(), addr(10001))]);
        assert_eq!(diff.new.len(), 2);
        assert_eq!(map.get("rs1"), Some(addr(10002)));
        assert_eq!(map.get("rs2"), Some(addr(10003)));
    }

    #[test]
    fn proxy_map_wire_round_trip() {
        let mut entries = HashMap::new();
        entries.insert("rs1".to_string(), ProxyEntry { hostname: "host1".into(), addr: addr(10001) });
        entries.insert("rs2".to_string(), ProxyEntry { hostname: "host2".into(), addr: addr(10002) });

        let encoded = encode_proxy_map(&entries);
        let decoded = decode_proxy_map(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }
}
