use std::os::unix::io::RawFd;

use crate::address::CommAddress;
use crate::ready::Ready;

use super::{HandlerCore, IoHandler};

/// Application-implemented callback for a socket registered via
/// `CommFacade::register_socket`, for protocols this crate doesn't frame
/// itself (e.g. a raw multicast socket). Mirrors `RawSocketHandler`.
pub trait RawSocketCallback: Send + Sync {
    /// Handles a readiness notification. Returns `true` if the socket
    /// should be deregistered.
    fn handle(&self, fd: RawFd, readiness: Ready) -> bool;

    fn deregistered(&self, fd: RawFd);

    /// Desired polling interest, re-queried after every `handle` call.
    fn poll_interest(&self, fd: RawFd) -> Ready;
}

pub struct RawHandler {
    core: HandlerCore,
    callback: Box<dyn RawSocketCallback>,
}

impl RawHandler {
    pub fn new(fd: RawFd, local_addr: CommAddress, callback: Box<dyn RawSocketCallback>) -> RawHandler {
        RawHandler {
            core: HandlerCore::new(fd, local_addr),
            callback,
        }
    }
}

impl IoHandler for RawHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_event(&self, readiness: Ready) -> bool {
        let should_close = self.callback.handle(self.core.fd, readiness);
        if should_close {
            self.callback.deregistered(self.core.fd);
        }
        should_close
    }

    fn desired_interest(&self) -> Ready {
        self.callback.poll_interest(self.core.fd)
    }
}
