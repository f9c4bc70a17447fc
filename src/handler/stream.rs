use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::address::CommAddress;
use crate::event::{CommEvent, DispatchHandler};
use crate::header::{CommHeader, HEADER_LENGTH};
use crate::reactor::Reactor;
use crate::ready::Ready;
use crate::request_cache::RequestCache;
use crate::token::Token;

use super::{HandlerCore, IoHandler};

/// Framing state for a TCP connection: whatever's arrived since the last
/// complete message was pulled off, with the implicit two phases (still
/// collecting the 38-byte header, then collecting the payload) expressed
/// by how much of `buf` is consumed rather than as two explicit states.
struct ReadState {
    buf: Vec<u8>,
}

impl ReadState {
    fn new() -> ReadState {
        ReadState { buf: Vec::with_capacity(HEADER_LENGTH) }
    }

    /// Pulls as many complete `(header, payload)` frames as `buf` now
    /// contains, leaving a partial trailing frame in place for next time.
    fn drain_frames(&mut self) -> Vec<(CommHeader, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LENGTH {
                break;
            }
            let header = match CommHeader::decode(&self.buf[..HEADER_LENGTH]) {
                Ok(h) => h,
                Err(_) => {
                    // Unrecoverable framing error: drop everything buffered
                    // so the next read starts clean rather than looping.
                    self.buf.clear();
                    break;
                }
            };
            let total = header.total_len as usize;
            if self.buf.len() < total {
                break;
            }
            let payload = self.buf[HEADER_LENGTH..total].to_vec();
            self.buf.drain(..total);
            frames.push((header, payload));
        }
        frames
    }
}

struct StreamState {
    read: ReadState,
    send_queue: VecDeque<crate::header::CommBuf>,
}

pub struct StreamHandler {
    core: HandlerCore,
    stream: Mutex<TcpStream>,
    peer_addr: CommAddress,
    dispatch: Arc<dyn DispatchHandler>,
    requests: Arc<Mutex<RequestCache>>,
    state: Mutex<StreamState>,
    reactor: Arc<Reactor>,
    token: Token,
    connecting: AtomicBool,
}

impl StreamHandler {
    /// `requests` is the owning reactor's request cache, shared so a
    /// response arriving on this connection can be handed straight to the
    /// per-request callback it was sent with rather than the connection's
    /// default dispatch. `reactor`/`token` are this handler's own owning
    /// reactor and registration token, obtained via
    /// `HandlerMap::alloc_token` before construction, so `send` can assert
    /// write interest on its owning reactor from another thread without
    /// ever touching the socket itself. `connecting` is `true` for an
    /// outbound connection still completing asynchronously (`EINPROGRESS`);
    /// `handle_event` holds off on framing traffic and fires
    /// `ConnectionEstablished` itself once the first writable readiness
    /// confirms the connect succeeded.
    pub fn new(
        stream: TcpStream,
        local_addr: CommAddress,
        peer_addr: CommAddress,
        dispatch: Arc<dyn DispatchHandler>,
        requests: Arc<Mutex<RequestCache>>,
        reactor: Arc<Reactor>,
        token: Token,
        connecting: bool,
    ) -> StreamHandler {
        let fd = stream.as_raw_fd();
        StreamHandler {
            core: HandlerCore::new(fd, local_addr),
            stream: Mutex::new(stream),
            peer_addr,
            dispatch,
            requests,
            state: Mutex::new(StreamState {
                read: ReadState::new(),
                send_queue: VecDeque::new(),
            }),
            reactor,
            token,
            connecting: AtomicBool::new(connecting),
        }
    }

    pub fn peer_addr(&self) -> &CommAddress {
        &self.peer_addr
    }

    /// Appends `buf` to the send queue. The owning `Reactor`'s thread is
    /// the only thread that ever writes to the socket; a caller on another
    /// thread that observes the queue go empty-to-non-empty only asserts
    /// write interest on the owning reactor and interrupts it, so the next
    /// `handle_event` there performs the actual flush.
    pub fn send(&self, buf: crate::header::CommBuf) -> bool {
        if self.core.is_decommissioned() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        let was_empty = state.send_queue.is_empty();
        state.send_queue.push_back(buf);
        drop(state);
        if was_empty {
            self.reactor.reassert_interest(self.core.fd, self.token, Ready::readable() | Ready::writable());
        }
        true
    }

    /// Flushes as much of the send queue as the socket will currently
    /// accept. Returns `true` if a write error made the connection
    /// unusable, in which case the caller must decommission the handler.
    fn flush_locked(
        stream: &Mutex<TcpStream>,
        state: &mut StreamState,
        peer_addr: &CommAddress,
    ) -> bool {
        let mut stream = stream.lock().unwrap();
        while let Some(buf) = state.send_queue.front_mut() {
            let slices = buf.remaining_slices();
            let mut sent_any = false;
            for slice in slices {
                if slice.is_empty() {
                    continue;
                }
                match stream.write(slice) {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.advance(n);
                        sent_any = true;
                        if n < slice.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("send to {peer_addr} failed: {e}");
                        state.send_queue.clear();
                        return true;
                    }
                }
            }
            if buf.is_fully_sent() {
                state.send_queue.pop_front();
            } else if !sent_any {
                break;
            }
        }
        false
    }
}

impl IoHandler for StreamHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_event(&self, readiness: Ready) -> bool {
        if self.connecting.load(Ordering::Acquire) {
            if readiness.is_fatal() {
                debug!("connect to {} failed", self.peer_addr);
                return true;
            }
            if !readiness.is_writable() {
                return false;
            }
            match self.stream.lock().unwrap().take_error() {
                Ok(None) => {
                    self.connecting.store(false, Ordering::Release);
                    self.dispatch.handle(CommEvent::ConnectionEstablished { addr: self.peer_addr.clone() });
                }
                Ok(Some(e)) => {
                    debug!("connect to {} failed: {e}", self.peer_addr);
                    return true;
                }
                Err(e) => {
                    warn!("take_error on connecting socket to {} failed: {e}", self.peer_addr);
                    return true;
                }
            }
        }

        if readiness.is_fatal() {
            debug!("stream handler for {} disconnected", self.peer_addr);
            return true;
        }

        if readiness.is_writable() {
            let mut state = self.state.lock().unwrap();
            if Self::flush_locked(&self.stream, &mut state, &self.peer_addr) {
                return true;
            }
        }

        if readiness.is_readable() {
            let mut buf = [0u8; 16 * 1024];
            loop {
                let read = {
                    let mut stream = self.stream.lock().unwrap();
                    stream.read(&mut buf)
                };
                match read {
                    Ok(0) => {
                        debug!("stream handler for {} hung up", self.peer_addr);
                        return true;
                    }
                    Ok(n) => {
                        let mut state = self.state.lock().unwrap();
                        state.read.buf.extend_from_slice(&buf[..n]);
                        let frames = state.read.drain_frames();
                        drop(state);
                        for (header, payload) in frames {
                            if header.is_proxy_map_update() {
                                match crate::proxy::decode_proxy_map(&payload) {
                                    Ok(mappings) => self.reactor.handlers().apply_remote_proxy_map(mappings),
                                    Err(e) => warn!("malformed proxy map update from {}: {e}", self.peer_addr),
                                }
                                continue;
                            }
                            let correlated = self.requests.lock().unwrap().remove(header.id);
                            match correlated {
                                Some(entry) => entry.dispatch.handle(CommEvent::Message {
                                    addr: entry.addr,
                                    header,
                                    payload: Arc::new(payload),
                                }),
                                None => self.dispatch.handle(CommEvent::Message {
                                    addr: self.peer_addr.clone(),
                                    header,
                                    payload: Arc::new(payload),
                                }),
                            }
                        }
                        if n < buf.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("read from {} failed: {e}", self.peer_addr);
                        return true;
                    }
                }
            }
        }

        false
    }

    fn desired_interest(&self) -> Ready {
        let mut interest = Ready::readable();
        if self.connecting.load(Ordering::Acquire) || !self.state.lock().unwrap().send_queue.is_empty() {
            interest.insert(Ready::writable());
        }
        interest
    }

    fn send(&self, buf: crate::header::CommBuf) -> bool {
        StreamHandler::send(self, buf)
    }

    fn request_table(&self) -> Option<Arc<Mutex<RequestCache>>> {
        Some(self.requests.clone())
    }

    fn notify_disconnect(&self) {
        self.dispatch.handle(CommEvent::Disconnect {
            addr: self.peer_addr.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_frames_waits_for_full_payload() {
        let header = CommHeader::new(1, 1);
        let comm_buf = crate::header::CommBuf::new(header, vec![1, 2, 3], vec![]);
        let mut read = ReadState::new();
        let total = comm_buf.total_len();
        let mut bytes = comm_buf.header.to_vec();
        bytes.extend_from_slice(&comm_buf.primary);

        read.buf.extend_from_slice(&bytes[..HEADER_LENGTH + 1]);
        assert!(read.drain_frames().is_empty());

        read.buf.extend_from_slice(&bytes[HEADER_LENGTH + 1..total]);
        let frames = read.drain_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, vec![1, 2, 3]);
    }
}
