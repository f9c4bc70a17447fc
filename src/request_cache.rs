use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::address::CommAddress;
use crate::event::DispatchHandler;
use crate::token::Token;

struct CacheNode {
    handler: Token,
    addr: CommAddress,
    dispatch: Arc<dyn DispatchHandler>,
    deadline: Instant,
    prev: Option<u32>,
    next: Option<u32>,
}

/// What a completed or expired request resolves to: the connection it was
/// sent on (for disconnect bookkeeping) and the per-request callback that
/// should receive the response, distinct from that connection's default
/// dispatch.
pub struct RequestEntry {
    pub handler: Token,
    pub addr: CommAddress,
    pub dispatch: Arc<dyn DispatchHandler>,
}

/// Holds one entry per outstanding request, correlating a request id with
/// the `IoHandler` it was sent on, the peer address, the callback that
/// should receive its response, and its absolute expiry.
///
/// Entries are kept in a doubly linked list ordered by insertion (the head
/// is the oldest, soonest-to-expire entry), backed by a hash map for O(1)
/// lookup and removal by id. This mirrors the assumption that requests on
/// the same reactor are inserted in roughly non-decreasing deadline order.
pub struct RequestCache {
    nodes: HashMap<u32, CacheNode>,
    head: Option<u32>,
    tail: Option<u32>,
}

impl RequestCache {
    pub fn new() -> RequestCache {
        RequestCache {
            nodes: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Inserts a pending request. Panics (matching the original's assert)
    /// if `id` is already present, since ids are caller-assigned and unique
    /// per in-flight request.
    pub fn insert(&mut self, id: u32, handler: Token, addr: CommAddress, dispatch: Arc<dyn DispatchHandler>, deadline: Instant) {
        debug_assert!(!self.nodes.contains_key(&id), "duplicate request id {id}");

        let node = CacheNode {
            handler,
            addr,
            dispatch,
            deadline,
            prev: self.tail,
            next: None,
        };
        if let Some(tail) = self.tail {
            self.nodes.get_mut(&tail).unwrap().next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        self.nodes.insert(id, node);
    }

    /// Removes a request by id, unlinking it from the list. Returns the
    /// entry it was associated with, if it was present.
    pub fn remove(&mut self, id: u32) -> Option<RequestEntry> {
        let node = self.nodes.remove(&id)?;
        self.unlink(id, &node);
        Some(RequestEntry {
            handler: node.handler,
            addr: node.addr,
            dispatch: node.dispatch,
        })
    }

    fn unlink(&mut self, id: u32, node: &CacheNode) {
        match node.prev {
            Some(prev) => self.nodes.get_mut(&prev).unwrap().next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes.get_mut(&next).unwrap().prev = node.prev,
            None => self.tail = node.prev,
        }
        let _ = id;
    }

    /// Pops every request at the head of the list whose deadline has
    /// passed, returning `(id, entry)` pairs in expiry order.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(u32, RequestEntry)> {
        let mut expired = Vec::new();
        while let Some(id) = self.head {
            let node = self.nodes.get(&id).unwrap();
            if node.deadline > now {
                break;
            }
            let node = self.nodes.remove(&id).unwrap();
            self.unlink(id, &node);
            expired.push((
                id,
                RequestEntry {
                    handler: node.handler,
                    addr: node.addr,
                    dispatch: node.dispatch,
                },
            ));
        }
        expired
    }

    /// Deadline of the oldest pending request, used to bound the reactor's
    /// poll wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.head.map(|id| self.nodes[&id].deadline)
    }

    /// Removes every request associated with `handler`, returning `(id,
    /// entry)` pairs so the caller can deliver an `ERROR` event for each.
    pub fn purge_handler(&mut self, handler: Token) -> Vec<(u32, RequestEntry)> {
        let ids: Vec<u32> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.handler == handler)
            .map(|(id, _)| *id)
            .collect();
        let mut purged = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.nodes.remove(&id) {
                self.unlink(id, &node);
                purged.push((
                    id,
                    RequestEntry {
                        handler: node.handler,
                        addr: node.addr,
                        dispatch: node.dispatch,
                    },
                ));
            }
        }
        purged
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        RequestCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn noop_dispatch() -> Arc<dyn DispatchHandler> {
        struct Noop;
        impl DispatchHandler for Noop {
            fn handle(&self, _event: crate::event::CommEvent) {}
        }
        Arc::new(Noop)
    }

    fn counting_dispatch() -> (Arc<dyn DispatchHandler>, Arc<Mutex<Vec<u32>>>) {
        struct Counter(Arc<Mutex<Vec<u32>>>);
        impl DispatchHandler for Counter {
            fn handle(&self, event: crate::event::CommEvent) {
                if let crate::event::CommEvent::Error { error: crate::event::CommErrorCode::RequestTimeout, .. } = event {
                    self.0.lock().unwrap().push(1);
                }
            }
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Counter(seen.clone())), seen)
    }

    fn addr() -> CommAddress {
        CommAddress::inet("127.0.0.1:1".parse().unwrap())
    }

    #[test]
    fn insert_and_remove() {
        let mut cache = RequestCache::new();
        let now = Instant::now();
        cache.insert(1, Token(10), addr(), noop_dispatch(), now + Duration::from_secs(1));
        cache.insert(2, Token(10), addr(), noop_dispatch(), now + Duration::from_secs(2));

        assert_eq!(cache.remove(1).unwrap().handler, Token(10));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(1).is_none());
    }

    #[test]
    fn pop_expired_in_order() {
        let mut cache = RequestCache::new();
        let now = Instant::now();
        let (dispatch, seen) = counting_dispatch();
        cache.insert(1, Token(1), addr(), dispatch.clone(), now + Duration::from_millis(10));
        cache.insert(2, Token(1), addr(), dispatch, now + Duration::from_millis(20));
        cache.insert(3, Token(1), addr(), noop_dispatch(), now + Duration::from_millis(30));

        let expired = cache.pop_expired(now + Duration::from_millis(25));
        let ids: Vec<u32> = expired.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(cache.len(), 1);

        for (_, entry) in expired {
            entry.dispatch.handle(crate::event::CommEvent::Error {
                addr: entry.addr,
                error: crate::event::CommErrorCode::RequestTimeout,
            });
        }
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn purge_by_handler() {
        let mut cache = RequestCache::new();
        let now = Instant::now();
        cache.insert(1, Token(1), addr(), noop_dispatch(), now);
        cache.insert(2, Token(2), addr(), noop_dispatch(), now);
        cache.insert(3, Token(1), addr(), noop_dispatch(), now);

        let mut purged: Vec<u32> = cache.purge_handler(Token(1)).into_iter().map(|(id, _)| id).collect();
        purged.sort();
        assert_eq!(purged, vec![1, 3]);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(2));
    }
}
