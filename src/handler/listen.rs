use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use log::{debug, warn};

use crate::address::CommAddress;
use crate::event::DispatchHandler;
use crate::net;
use crate::ready::Ready;

use super::{HandlerCore, IoHandler};

/// Produced by `ListenHandler::handle_event` for each connection it
/// accepted, so the reactor can turn it into a `StreamHandler` and register
/// it with its own `HandlerMap` entry.
pub struct Accepted {
    pub stream: std::net::TcpStream,
    pub peer_addr: CommAddress,
}

pub struct ListenHandler {
    core: HandlerCore,
    listener: TcpListener,
    dispatch: Arc<dyn DispatchHandler>,
}

impl ListenHandler {
    pub fn new(listener: TcpListener, local_addr: CommAddress, dispatch: Arc<dyn DispatchHandler>) -> ListenHandler {
        let fd = listener.as_raw_fd();
        ListenHandler {
            core: HandlerCore::new(fd, local_addr),
            listener,
            dispatch,
        }
    }

    pub fn dispatch(&self) -> &Arc<dyn DispatchHandler> {
        &self.dispatch
    }

    /// Drains every connection currently pending in the accept backlog.
    pub fn accept_all(&self) -> Vec<Accepted> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let peer_addr = match addr {
                        std::net::SocketAddr::V4(addr) => CommAddress::inet(addr),
                        std::net::SocketAddr::V6(addr) => {
                            warn!("rejecting IPv6 peer {addr}");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("set_nonblocking on accepted socket failed: {e}");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    if let Err(e) = net::set_keepalive(&stream) {
                        warn!("set_keepalive on accepted socket failed: {e}");
                    }
                    if let Err(e) = net::set_accept_buffer_sizes(&stream) {
                        warn!("setting accepted socket buffer sizes failed: {e}");
                    }
                    debug!("accepted connection from {peer_addr}");
                    accepted.push(Accepted { stream, peer_addr });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept() failed: {e}");
                    break;
                }
            }
        }
        accepted
    }
}

impl IoHandler for ListenHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_event(&self, readiness: Ready) -> bool {
        readiness.is_fatal()
    }

    fn desired_interest(&self) -> Ready {
        Ready::readable()
    }
}
