use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, warn};

use crate::address::CommAddress;
use crate::awakener::Awakener;
use crate::config::CommConfig;
use crate::event::{CommEvent, DispatchHandler};
use crate::handler_map::HandlerMap;
use crate::poll::{new_backend, Event, PollBackend, PollTimeout};
use crate::ready::Ready;
use crate::request_cache::RequestCache;
use crate::timer::TimerHeap;
use crate::token::Token;

/// Reserved token identifying the reactor's own wakeup socket in poll
/// events, distinct from every token `HandlerMap::insert_handler` hands out
/// (those come from a zero-based counter and never reach `usize::MAX`).
const AWAKENER_TOKEN: Token = Token(usize::MAX);

/// Single-threaded event loop: one poll backend, one request cache, one
/// timer heap, one interrupt socket. A pool of these (plus one dedicated to
/// timers) make up the running system; see `reactor_pool`.
pub struct Reactor {
    backend: Box<dyn PollBackend>,
    awakener: Awakener,
    handlers: Arc<HandlerMap>,
    requests: Arc<Mutex<RequestCache>>,
    timers: Mutex<TimerHeap>,
    timer_dispatch: Mutex<HashMap<Token, Arc<dyn DispatchHandler>>>,
    running: AtomicBool,
    started: Instant,
}

impl Reactor {
    pub fn new(handlers: Arc<HandlerMap>, config: &CommConfig) -> io::Result<Reactor> {
        let backend = new_backend(config.backend, config.edge_triggered)?;
        let awakener = Awakener::new()?;
        backend.add(awakener.as_raw_fd(), AWAKENER_TOKEN, Ready::readable())?;

        Ok(Reactor {
            backend,
            awakener,
            handlers,
            requests: Arc::new(Mutex::new(RequestCache::new())),
            timers: Mutex::new(TimerHeap::new()),
            timer_dispatch: Mutex::new(HashMap::new()),
            started: Instant::now(),
            running: AtomicBool::new(false),
        })
    }

    /// Shared handle to this reactor's request cache, handed to
    /// `StreamHandler`s registered on it so an arriving response can be
    /// correlated with its per-request callback without routing back
    /// through the reactor itself.
    pub fn request_table(&self) -> Arc<Mutex<RequestCache>> {
        self.requests.clone()
    }

    /// Shared handler registry, handed to `StreamHandler`s so an incoming
    /// `PROXY_MAP_UPDATE` frame can apply itself to the process-wide proxy
    /// table without routing back through `CommFacade`.
    pub fn handlers(&self) -> &Arc<HandlerMap> {
        &self.handlers
    }

    /// Time elapsed since this reactor started running, exposed for
    /// diagnostics the way the original recorded a construction timestamp.
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Registers a handler's fd for its initially desired interest. The
    /// handler must already be installed in the shared `HandlerMap`.
    pub fn register(&self, token: Token, fd: std::os::unix::io::RawFd, interest: Ready) -> io::Result<()> {
        self.backend.add(fd, token, interest)
    }

    pub fn deregister(&self, fd: std::os::unix::io::RawFd) -> io::Result<()> {
        self.backend.remove(fd)
    }

    /// Re-applies `interest` to `fd`'s poll registration and interrupts this
    /// reactor, so a handler's send queue going empty-to-non-empty on
    /// another thread gets write readiness asserted immediately rather than
    /// waiting on some unrelated event to drive the next `backend.modify`
    /// call. The actual write still only ever happens on this reactor's own
    /// thread, from `dispatch_io_event`.
    pub fn reassert_interest(&self, fd: std::os::unix::io::RawFd, token: Token, interest: Ready) {
        if let Err(e) = self.backend.modify(fd, token, interest) {
            warn!("failed to reassert poll interest for {token:?}: {e}");
        }
        self.interrupt();
    }

    /// Registers a request deadline and interrupts this reactor's poll wait,
    /// since the new deadline may be nearer than whatever timeout the loop
    /// is currently blocked on.
    pub fn add_request(
        &self,
        id: u32,
        handler: Token,
        addr: CommAddress,
        dispatch: Arc<dyn DispatchHandler>,
        deadline: Instant,
    ) {
        self.requests.lock().unwrap().insert(id, handler, addr, dispatch, deadline);
        self.interrupt();
    }

    /// Registers a timer and interrupts this reactor's poll wait. The timer
    /// reactor's only fd is its own self-pipe, so without this a nearer
    /// deadline inserted while it's blocked indefinitely would never be
    /// noticed.
    pub fn add_timer(&self, token: Token, deadline: Instant, dispatch: Arc<dyn DispatchHandler>) {
        self.timers.lock().unwrap().insert(token, deadline);
        self.timer_dispatch.lock().unwrap().insert(token, dispatch);
        self.interrupt();
    }

    pub fn cancel_timer(&self, token: Token) -> bool {
        self.timer_dispatch.lock().unwrap().remove(&token);
        self.timers.lock().unwrap().cancel(token)
    }

    /// Interrupts a blocked `wait()`, used both to ask the loop to stop and
    /// to make it notice newly added requests/timers/registrations sooner
    /// than the current timeout would.
    pub fn interrupt(&self) {
        if let Err(e) = self.awakener.wakeup() {
            warn!("failed to interrupt reactor: {e}");
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.interrupt();
    }

    fn next_timeout(&self) -> Option<std::time::Duration> {
        let now = Instant::now();
        let mut timeout = PollTimeout::indefinite();
        if let Some(deadline) = self.requests.lock().unwrap().next_deadline() {
            timeout.tighten(PollTimeout::until(now, deadline));
        }
        if let Some(deadline) = self.timers.lock().unwrap().next_deadline() {
            timeout.tighten(PollTimeout::until(now, deadline));
        }
        timeout.as_duration()
    }

    fn handle_request_timeouts(&self, now: Instant) {
        let expired = self.requests.lock().unwrap().pop_expired(now);
        for (id, entry) in expired {
            debug!("request {id} on handler {:?} timed out", entry.handler);
            entry.dispatch.handle(CommEvent::Error {
                addr: entry.addr,
                error: crate::event::CommErrorCode::RequestTimeout,
            });
        }
    }

    fn handle_timer_timeouts(&self, now: Instant) {
        let expired = self.timers.lock().unwrap().pop_expired(now);
        let mut dispatch_map = self.timer_dispatch.lock().unwrap();
        for token in expired {
            if let Some(dispatch) = dispatch_map.remove(&token) {
                dispatch.handle(CommEvent::Timer);
            }
        }
    }

    fn dispatch_io_event(&self, event: Event) {
        let handler = match self.handlers.checkout(event.token) {
            Some(handler) => handler,
            None => return,
        };
        let should_decommission = handler.handle_event(event.readiness);
        if should_decommission {
            let _ = self.backend.remove(handler.fd());
            self.handlers.decommission_and_notify(event.token, &handler);
        } else if let Err(e) = self.backend.modify(handler.fd(), event.token, handler.desired_interest()) {
            warn!("failed to update poll interest for {:?}: {e}", event.token);
        }
        self.handlers.release(event.token);
    }

    /// Runs the loop until `stop()` is called from another thread.
    pub fn run(&self) {
        self.running.store(true, Ordering::Release);
        let mut events = Vec::with_capacity(1024);

        while self.running.load(Ordering::Acquire) {
            events.clear();
            let timeout = self.next_timeout();
            match self.backend.wait(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("{} wait failed: {e}", self.backend.name());
                    continue;
                }
            }

            for event in &events {
                if event.token == AWAKENER_TOKEN {
                    let _ = self.awakener.drain();
                    continue;
                }
                self.dispatch_io_event(*event);
            }

            let now = Instant::now();
            self.handle_request_timeouts(now);
            self.handle_timer_timeouts(now);
            self.handlers.purge_decommissioned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactor_starts_and_stops() {
        let handlers = Arc::new(HandlerMap::new());
        let config = CommConfig::default();
        let reactor = Arc::new(Reactor::new(handlers, &config).unwrap());
        let runner = {
            let reactor = reactor.clone();
            std::thread::spawn(move || reactor.run())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        reactor.stop();
        runner.join().unwrap();
    }
}
