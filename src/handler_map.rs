use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, warn};

use crate::error::{CommError, CommResult};
use crate::event::{CommErrorCode, CommEvent};
use crate::handler::IoHandler;
use crate::proxy::{ProxyEntry, ProxyMap, ProxyMapDiff};
use crate::token::Token;

struct Inner {
    handlers: HashMap<Token, Arc<dyn IoHandler>>,
    by_addr: HashMap<SocketAddrV4, Token>,
    aliases: HashMap<String, Token>,
    proxies: ProxyMap,
}

/// Central registry of live handlers, keyed by `Token` and indexed by inet
/// address, plus the proxy name table. Decommissioning a handler is a
/// two-phase affair: `decommission_handler` flags it and removes it from the
/// lookup indexes immediately, but the handler itself is only dropped once
/// `purge_handler` confirms `destroy_ok()` — i.e. no reactor thread still
/// holds a checked-out reference to it.
pub struct HandlerMap {
    inner: Mutex<Inner>,
    empty_cond: Condvar,
    next_token: AtomicUsize,
}

impl HandlerMap {
    pub fn new() -> HandlerMap {
        HandlerMap {
            inner: Mutex::new(Inner {
                handlers: HashMap::new(),
                by_addr: HashMap::new(),
                aliases: HashMap::new(),
                proxies: ProxyMap::new(),
            }),
            empty_cond: Condvar::new(),
            next_token: AtomicUsize::new(0),
        }
    }

    /// Allocates a token ahead of constructing the handler it will belong
    /// to, for variants (stream, datagram) that need to know their own
    /// token before they can be built, so they can hand it back to their
    /// owning `Reactor` when asserting write interest from another thread.
    pub fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Indexes an already-constructed handler under a token obtained from
    /// `alloc_token`.
    pub fn insert_with_token(&self, token: Token, addr: SocketAddrV4, handler: Arc<dyn IoHandler>) {
        let mut inner = self.inner.lock().unwrap();
        inner.handlers.insert(token, handler);
        inner.by_addr.insert(addr, token);
    }

    /// Registers a new handler under a freshly allocated token and indexes
    /// it by its local address.
    pub fn insert_handler(&self, addr: SocketAddrV4, handler: Arc<dyn IoHandler>) -> Token {
        let token = self.alloc_token();
        self.insert_with_token(token, addr, handler);
        token
    }

    /// Checks a handler out by token, bumping its reference count so it
    /// cannot be purged while the caller is using it. Returns `None` if the
    /// token is unknown or the handler is already decommissioned.
    pub fn checkout(&self, token: Token) -> Option<Arc<dyn IoHandler>> {
        let inner = self.inner.lock().unwrap();
        let handler = inner.handlers.get(&token)?;
        if handler.core().checkout() {
            Some(handler.clone())
        } else {
            None
        }
    }

    pub fn release(&self, token: Token) {
        let inner = self.inner.lock().unwrap();
        if let Some(handler) = inner.handlers.get(&token) {
            handler.core().release();
        }
    }

    pub fn lookup_by_addr(&self, addr: &SocketAddrV4) -> Option<Token> {
        self.inner.lock().unwrap().by_addr.get(addr).copied()
    }

    pub fn get(&self, token: Token) -> Option<Arc<dyn IoHandler>> {
        self.inner.lock().unwrap().handlers.get(&token).cloned()
    }

    /// Flags the handler as decommissioned and removes it from the address
    /// index so no new lookups can find it; the handler object itself stays
    /// alive until `purge_handler` confirms it is safe to drop.
    pub fn decommission_handler(&self, token: Token) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handler) = inner.handlers.get(&token) {
            handler.core().decommission();
            debug!("decommissioned handler {token:?}");
        }
        inner.by_addr.retain(|_, t| *t != token);
        inner.aliases.retain(|_, t| *t != token);
    }

    /// Decommissions every live handler and gives each one its loss
    /// notification, the way `decommission_and_notify` does for a single
    /// handler. Used by `CommFacade::shutdown`/`ReactorPool::shutdown` so a
    /// whole-process teardown notifies pending requests and connection
    /// dispatches exactly as a one-off disconnect would, rather than
    /// silently dropping handlers once the purge sweep catches up with
    /// them.
    pub fn decommission_all_and_notify(&self) {
        let handlers: Vec<(Token, Arc<dyn IoHandler>)> = {
            let inner = self.inner.lock().unwrap();
            inner.handlers.iter().map(|(t, h)| (*t, h.clone())).collect()
        };
        for (token, handler) in handlers {
            self.decommission_and_notify(token, &handler);
        }
    }

    /// Decommissions `handler`, delivers `ERROR(BROKEN_CONNECTION)` to every
    /// request still pending on it, then `DISCONNECT` to its default
    /// dispatch, in that order. Used by the reactor loop after a fatal
    /// readiness event, by `CommFacade` when a send attempt outside the
    /// reactor thread discovers the connection is already dead, and by
    /// `decommission_all_and_notify` during shutdown, so all three paths
    /// notify the application identically. `HandlerCore::claim_notify`
    /// ensures this fires at most once per handler no matter which of those
    /// paths gets there first.
    pub fn decommission_and_notify(&self, token: Token, handler: &Arc<dyn IoHandler>) {
        self.decommission_handler(token);
        if !handler.core().claim_notify() {
            return;
        }
        if let Some(table) = handler.request_table() {
            for (_, entry) in table.lock().unwrap().purge_handler(token) {
                entry.dispatch.handle(CommEvent::Error {
                    addr: entry.addr,
                    error: CommErrorCode::BrokenConnection,
                });
            }
        }
        handler.notify_disconnect();
    }

    /// Drops the handler if it has been decommissioned and has no
    /// outstanding checkouts. Returns `true` if it was purged.
    pub fn purge_handler(&self, token: Token) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let ready = match inner.handlers.get(&token) {
            Some(handler) => handler.core().destroy_ok(),
            None => return false,
        };
        if !ready {
            return false;
        }
        if let Some(handler) = inner.handlers.remove(&token) {
            inner.by_addr.retain(|_, t| *t != token);
            inner.aliases.retain(|_, t| *t != token);
            let _ = handler;
        }
        if inner.handlers.is_empty() {
            self.empty_cond.notify_all();
        }
        true
    }

    /// Sweeps every decommissioned-and-idle handler, returning how many were
    /// dropped. Called by the reactor loop between poll iterations.
    pub fn purge_decommissioned(&self) -> usize {
        let tokens: Vec<Token> = {
            let inner = self.inner.lock().unwrap();
            inner
                .handlers
                .iter()
                .filter(|(_, h)| h.core().is_decommissioned())
                .map(|(t, _)| *t)
                .collect()
        };
        tokens.into_iter().filter(|t| self.purge_handler(*t)).count()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().unwrap().handlers.len()
    }

    /// Blocks the calling thread until every handler has been purged, used
    /// during graceful shutdown.
    pub fn wait_empty(&self) {
        let inner = self.inner.lock().unwrap();
        let _guard = self
            .empty_cond
            .wait_while(inner, |inner| !inner.handlers.is_empty())
            .unwrap();
    }

    /// Associates a logical name with an existing handler, so future lookups
    /// by that name resolve to the same token. Fails if the name is already
    /// bound to a different handler.
    pub fn set_alias(&self, alias: String, token: Token) -> CommResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.aliases.get(&alias) {
            Some(existing) if *existing != token => Err(CommError::ConflictingAddress),
            _ => {
                inner.aliases.insert(alias, token);
                Ok(())
            }
        }
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<Token> {
        self.inner.lock().unwrap().aliases.get(alias).copied()
    }

    /// Learns a new proxy binding, tags the handler already listening on
    /// `addr` (if any) as serving that proxy, then broadcasts the updated
    /// table to every live stream connection as a `PROXY_MAP_UPDATE` frame.
    pub fn add_proxy(&self, proxy: String, hostname: String, addr: SocketAddrV4) {
        let mut inner = self.inner.lock().unwrap();
        inner.proxies.add(proxy.clone(), hostname, addr);
        if let Some(token) = inner.by_addr.get(&addr).copied() {
            if let Some(handler) = inner.handlers.get(&token) {
                handler.core().set_proxy(proxy);
            }
        }
        let snapshot = inner.proxies.snapshot();
        let handlers: Vec<Arc<dyn IoHandler>> = inner.handlers.values().cloned().collect();
        drop(inner);
        Self::broadcast_proxy_map(&snapshot, &handlers);
    }

    /// Replaces the whole proxy table, returning the diff, and broadcasts
    /// the new table to every live stream connection the same way
    /// `add_proxy` does. A moved or removed proxy entry does not by itself
    /// decommission any connection already open against its old address.
    pub fn update_proxy_map(&self, mappings: HashMap<String, ProxyEntry>) -> ProxyMapDiff {
        let mut inner = self.inner.lock().unwrap();
        let diff = inner.proxies.update(mappings);
        let snapshot = inner.proxies.snapshot();
        let handlers: Vec<Arc<dyn IoHandler>> = inner.handlers.values().cloned().collect();
        drop(inner);
        Self::broadcast_proxy_map(&snapshot, &handlers);
        diff
    }

    /// Applies a proxy table received over the wire from a peer without
    /// re-broadcasting it, so gossip doesn't bounce back and forth between
    /// the two ends of the connection it arrived on.
    pub fn apply_remote_proxy_map(&self, mappings: HashMap<String, ProxyEntry>) {
        self.inner.lock().unwrap().proxies.update(mappings);
    }

    pub fn proxy_snapshot(&self) -> HashMap<String, ProxyEntry> {
        self.inner.lock().unwrap().proxies.snapshot()
    }

    /// Sends the current proxy table to `handler` as a `PROXY_MAP_UPDATE`
    /// frame, used both by the broadcast path and to hand a fresh connection
    /// the table as soon as it's adopted.
    pub fn send_proxy_map(handler: &Arc<dyn IoHandler>, snapshot: &HashMap<String, ProxyEntry>) {
        let payload = crate::proxy::encode_proxy_map(snapshot);
        let mut header = crate::header::CommHeader::new(0, 0);
        header.flags = crate::header::flags::PROXY_MAP_UPDATE;
        let buf = crate::header::CommBuf::new(header, payload, Vec::new());
        handler.send(buf);
    }

    fn broadcast_proxy_map(snapshot: &HashMap<String, ProxyEntry>, handlers: &[Arc<dyn IoHandler>]) {
        for handler in handlers {
            Self::send_proxy_map(handler, snapshot);
        }
    }

    /// Resolves a logical proxy name to the inet address currently serving
    /// it. Direct inet addresses pass through unchanged.
    pub fn translate_address(&self, addr: &crate::address::CommAddress) -> CommResult<SocketAddrV4> {
        match addr {
            crate::address::CommAddress::Inet(inet) => Ok(*inet),
            crate::address::CommAddress::Proxy(name) => self
                .inner
                .lock()
                .unwrap()
                .proxies
                .get(name)
                .ok_or_else(|| CommError::InvalidProxy(name.clone())),
        }
    }
}

impl Default for HandlerMap {
    fn default() -> HandlerMap {
        HandlerMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CommAddress;
    use crate::handler::HandlerCore;
    use crate::ready::Ready;
    use std::net::Ipv4Addr;

    struct NullHandler {
        core: HandlerCore,
    }

    impl IoHandler for NullHandler {
        fn core(&self) -> &HandlerCore {
            &self.core
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn handle_event(&self, _readiness: Ready) -> bool {
            false
        }
        fn desired_interest(&self) -> Ready {
            Ready::readable()
        }
    }

    fn addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    fn null_handler(fd: i32, local: SocketAddrV4) -> Arc<dyn IoHandler> {
        Arc::new(NullHandler {
            core: HandlerCore::new(fd, CommAddress::inet(local)),
        })
    }

    #[test]
    fn insert_lookup_and_purge_requires_checkout_drained() {
        let map = HandlerMap::new();
        let token = map.insert_handler(addr(10001), null_handler(3, addr(10001)));
        assert_eq!(map.lookup_by_addr(&addr(10001)), Some(token));

        let handler = map.checkout(token).unwrap();
        map.decommission_handler(token);
        assert!(!map.purge_handler(token));

        drop(handler);
        map.release(token);
        assert!(map.purge_handler(token));
        assert_eq!(map.lookup_by_addr(&addr(10001)), None);
    }

    #[test]
    fn alias_conflict_rejected() {
        let map = HandlerMap::new();
        let a = map.insert_handler(addr(10001), null_handler(3, addr(10001)));
        let b = map.insert_handler(addr(10002), null_handler(4, addr(10002)));
        map.set_alias("rs1".into(), a).unwrap();
        assert!(map.set_alias("rs1".into(), b).is_err());
        assert_eq!(map.resolve_alias("rs1"), Some(a));
    }

    #[test]
    fn translate_address_resolves_proxy() {
        let map = HandlerMap::new();
        map.add_proxy("rs1".into(), "host1".into(), addr(10001));
        let resolved = map.translate_address(&CommAddress::proxy("rs1")).unwrap();
        assert_eq!(resolved, addr(10001));
        assert!(map.translate_address(&CommAddress::proxy("missing")).is_err());
    }
}
