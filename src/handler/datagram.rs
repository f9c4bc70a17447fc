use std::collections::VecDeque;
use std::net::{SocketAddrV4, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::address::CommAddress;
use crate::event::{CommErrorCode, CommEvent, DispatchHandler};
use crate::header::{CommBuf, CommHeader, HEADER_LENGTH};
use crate::reactor::Reactor;
use crate::ready::Ready;
use crate::token::Token;

use super::{HandlerCore, IoHandler};

const MAX_DATAGRAM_SIZE: usize = 65536;

struct SendRec {
    dest: SocketAddrV4,
    buf: CommBuf,
}

pub struct DatagramHandler {
    core: HandlerCore,
    socket: Mutex<UdpSocket>,
    dispatch: Arc<dyn DispatchHandler>,
    send_queue: Mutex<VecDeque<SendRec>>,
    reactor: Arc<Reactor>,
    token: Token,
}

impl DatagramHandler {
    pub fn new(
        socket: UdpSocket,
        local_addr: CommAddress,
        dispatch: Arc<dyn DispatchHandler>,
        reactor: Arc<Reactor>,
        token: Token,
    ) -> DatagramHandler {
        let fd = socket.as_raw_fd();
        DatagramHandler {
            core: HandlerCore::new(fd, local_addr),
            socket: Mutex::new(socket),
            dispatch,
            send_queue: Mutex::new(VecDeque::new()),
            reactor,
            token,
        }
    }

    /// Appends `(dest, buf)` to the send queue. As with `StreamHandler`,
    /// only the owning reactor's thread ever calls `sendto`; a caller
    /// observing empty-to-non-empty just asserts write interest and
    /// interrupts that reactor.
    pub fn send_to(&self, dest: SocketAddrV4, buf: CommBuf) {
        let mut queue = self.send_queue.lock().unwrap();
        let was_empty = queue.is_empty();
        queue.push_back(SendRec { dest, buf });
        drop(queue);
        if was_empty {
            self.reactor.reassert_interest(self.core.fd, self.token, Ready::readable() | Ready::writable());
        }
    }

    fn flush_locked(&self, queue: &mut VecDeque<SendRec>) {
        let socket = self.socket.lock().unwrap();
        while let Some(rec) = queue.front() {
            let mut datagram = Vec::with_capacity(rec.buf.total_len());
            datagram.extend_from_slice(&rec.buf.header);
            datagram.extend_from_slice(&rec.buf.primary);
            datagram.extend_from_slice(&rec.buf.extension);

            match socket.send_to(&datagram, rec.dest) {
                Ok(_) => {
                    queue.pop_front();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("sendto {} failed: {e}", rec.dest);
                    self.dispatch.handle(CommEvent::Error {
                        addr: CommAddress::inet(rec.dest),
                        error: CommErrorCode::SendError,
                    });
                    queue.pop_front();
                }
            }
        }
    }
}

impl IoHandler for DatagramHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_event(&self, readiness: Ready) -> bool {
        if readiness.is_fatal() {
            return true;
        }

        if readiness.is_writable() {
            let mut queue = self.send_queue.lock().unwrap();
            self.flush_locked(&mut queue);
        }

        if readiness.is_readable() {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let received = {
                    let socket = self.socket.lock().unwrap();
                    socket.recv_from(&mut buf)
                };
                match received {
                    Ok((n, from)) if n >= HEADER_LENGTH => {
                        let from = match from {
                            std::net::SocketAddr::V4(addr) => addr,
                            std::net::SocketAddr::V6(_) => continue,
                        };
                        match CommHeader::decode(&buf[..HEADER_LENGTH]) {
                            Ok(header) => {
                                let payload = buf[HEADER_LENGTH..n].to_vec();
                                self.dispatch.handle(CommEvent::Message {
                                    addr: CommAddress::inet(from),
                                    header,
                                    payload: Arc::new(payload),
                                });
                            }
                            Err(_) => warn!("dropping malformed datagram from {from}"),
                        }
                    }
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("recv_from failed: {e}");
                        break;
                    }
                }
            }
        }

        false
    }

    fn desired_interest(&self) -> Ready {
        let mut interest = Ready::readable();
        if !self.send_queue.lock().unwrap().is_empty() {
            interest.insert(Ready::writable());
        }
        interest
    }

}
