pub mod datagram;
pub mod listen;
pub mod raw;
pub mod stream;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::address::CommAddress;
use crate::ready::Ready;
use crate::request_cache::RequestCache;

pub use datagram::DatagramHandler;
pub use listen::ListenHandler;
pub use raw::RawHandler;
pub use stream::StreamHandler;

/// Shared bookkeeping every handler variant embeds: reference count and
/// decommission flag, mirroring the base `IOHandler` class's fields.
///
/// A handler is only safe to drop once it is decommissioned *and* its
/// reference count has fallen back to zero (`destroy_ok`), which is what
/// lets `HandlerMap::purge_handler` run concurrently with in-flight uses of
/// the handler on other reactor threads.
pub struct HandlerCore {
    pub fd: RawFd,
    pub local_addr: CommAddress,
    proxy: Mutex<Option<String>>,
    reference_count: AtomicUsize,
    decommissioned: AtomicBool,
    notified: AtomicBool,
}

impl HandlerCore {
    pub fn new(fd: RawFd, local_addr: CommAddress) -> HandlerCore {
        HandlerCore {
            fd,
            local_addr,
            proxy: Mutex::new(None),
            reference_count: AtomicUsize::new(0),
            decommissioned: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        }
    }

    /// Tags this handler as serving `proxy`, set when `HandlerMap::add_proxy`
    /// learns a binding whose address matches this handler's local address.
    pub fn set_proxy(&self, proxy: String) {
        *self.proxy.lock().unwrap() = Some(proxy);
    }

    pub fn proxy_name(&self) -> Option<String> {
        self.proxy.lock().unwrap().clone()
    }

    /// Claims the right to deliver this handler's loss notification
    /// (pending-request `ERROR`s plus the default dispatch's `DISCONNECT`).
    /// Returns `true` for exactly one caller across the handler's lifetime,
    /// however many times it gets decommissioned from (a fatal readiness
    /// event, a failed out-of-reactor-thread send, or a whole-pool
    /// shutdown sweeping every handler regardless of how it died).
    pub fn claim_notify(&self) -> bool {
        self.notified
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn checkout(&self) -> bool {
        if self.decommissioned.load(Ordering::Acquire) {
            return false;
        }
        self.reference_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn release(&self) {
        self.reference_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn decommission(&self) {
        self.decommissioned.store(true, Ordering::Release);
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::Acquire)
    }

    pub fn destroy_ok(&self) -> bool {
        self.decommissioned.load(Ordering::Acquire) && self.reference_count.load(Ordering::Acquire) == 0
    }
}

/// Common behavior across stream, datagram, listen and raw handlers. Each
/// variant owns its socket and translates reactor-delivered readiness into
/// `CommEvent`s via its installed `DispatchHandler`.
pub trait IoHandler: Send + Sync + 'static {
    fn core(&self) -> &HandlerCore;

    /// Lets callers that need a concrete variant's extra methods (accepting
    /// connections, sending to an arbitrary peer) recover it, the same way
    /// the original's templated `checkout_handler<T>` did with a downcast.
    fn as_any(&self) -> &dyn std::any::Any;

    fn fd(&self) -> RawFd {
        self.core().fd
    }

    /// Processes a readiness notification. Returns `true` if the handler
    /// should be decommissioned after this call (fatal error, peer
    /// disconnect, or an explicit close request for a raw handler).
    fn handle_event(&self, readiness: Ready) -> bool;

    /// Interest the reactor should register/modify for this fd after
    /// `handle_event` returns — read is always wanted; write is wanted
    /// only while a send queue has pending bytes.
    fn desired_interest(&self) -> Ready;

    /// Queues a framed message for send. Only `StreamHandler` and
    /// `DatagramHandler` (via `send_datagram_to`) support this; other
    /// variants return `false`.
    fn send(&self, _buf: crate::header::CommBuf) -> bool {
        false
    }

    /// Shared request-correlation table for handlers that support
    /// request/response tracking. Only `StreamHandler` carries one; other
    /// variants have no notion of a per-request callback.
    fn request_table(&self) -> Option<Arc<Mutex<RequestCache>>> {
        None
    }

    /// Delivers `DISCONNECT`/terminal notice to this handler's default
    /// dispatch. Called by the reactor after a fatal `handle_event` and
    /// after outstanding requests on this handler have already been given
    /// their own `ERROR` — request errors are always delivered before the
    /// connection-level disconnect.
    fn notify_disconnect(&self) {}
}
