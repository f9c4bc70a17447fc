mod epoll;
mod event_ports;
mod kqueue;
mod posix;
mod timeout;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::config::PollBackendKind;
use crate::ready::Ready;
use crate::token::Token;

pub use timeout::PollTimeout;

/// One readiness notification: a registered token paired with the set of
/// conditions that fired for it.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: Token,
    pub readiness: Ready,
}

impl Event {
    pub fn new(token: Token, readiness: Ready) -> Event {
        Event { token, readiness }
    }
}

/// Unifies epoll, kqueue, event ports and POSIX `poll()` behind one
/// interface used by the reactor. Every registered fd's interest is keyed
/// by `Token`, which `HandlerMap` hands out.
pub trait PollBackend: Send {
    fn add(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()>;
    fn modify(&self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()>;
    fn remove(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks up to `timeout` (or indefinitely if `None`), appending fired
    /// events to `events`. `events` is cleared by the caller beforehand.
    fn wait(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;

    fn name(&self) -> &'static str;
}

/// Picks a concrete backend. `Auto` probes in the same order
/// `ReactorFactory::initialize` did: the platform's native mechanism first,
/// falling back to `poll()`.
pub fn new_backend(
    kind: PollBackendKind,
    edge_triggered: bool,
) -> io::Result<Box<dyn PollBackend>> {
    match kind {
        PollBackendKind::Poll => Ok(Box::new(posix::Poll::new()?)),
        PollBackendKind::Epoll => Ok(Box::new(epoll::Epoll::new(edge_triggered)?)),
        PollBackendKind::Kqueue => Ok(Box::new(kqueue::Kqueue::new()?)),
        PollBackendKind::EventPorts => Ok(Box::new(event_ports::EventPorts::new()?)),
        PollBackendKind::Auto => new_backend(native_kind(), edge_triggered),
    }
}

#[cfg(target_os = "linux")]
fn native_kind() -> PollBackendKind {
    PollBackendKind::Epoll
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn native_kind() -> PollBackendKind {
    PollBackendKind::Kqueue
}

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
fn native_kind() -> PollBackendKind {
    PollBackendKind::EventPorts
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "solaris",
    target_os = "illumos"
)))]
fn native_kind() -> PollBackendKind {
    PollBackendKind::Poll
}
