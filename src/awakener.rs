use std::io;
use std::net::{SocketAddrV4, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use rand::Rng;

/// Breaks a blocked poll wait by way of a UDP socket bound to loopback on
/// an ephemeral port and connected to itself. Every backend can register
/// this socket's fd for read interest, so a reactor with no native
/// interrupt primitive (POSIX `poll()`) still has a way to wake up when a
/// new request, timer or handler registration needs its attention before
/// the current timeout expires.
///
/// Picking an ephemeral port and retrying on `EADDRINUSE` avoids colliding
/// with another reactor's interrupt socket in the same process.
pub struct Awakener {
    socket: UdpSocket,
}

const INTERRUPT_PORT_BASE: u16 = 49152;
const INTERRUPT_PORT_SPAN: u16 = 16383;

impl Awakener {
    pub fn new() -> io::Result<Awakener> {
        let mut rng = rand::thread_rng();
        loop {
            let port = INTERRUPT_PORT_BASE + rng.gen_range(0..INTERRUPT_PORT_SPAN);
            let addr = SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, port);
            match UdpSocket::bind(addr) {
                Ok(socket) => {
                    socket.set_nonblocking(true)?;
                    socket.connect(addr)?;
                    return Ok(Awakener { socket });
                }
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Sends a single interrupt byte. Safe to call repeatedly; a pending
    /// unread byte already guarantees the poll wait will return.
    pub fn wakeup(&self) -> io::Result<()> {
        match self.socket.send(&[1u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains any pending interrupt bytes so the socket goes back to
    /// non-readable before the next poll wait.
    pub fn drain(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl AsRawFd for Awakener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakeup_then_drain_leaves_socket_quiet() {
        let awakener = Awakener::new().unwrap();
        awakener.wakeup().unwrap();
        awakener.drain().unwrap();
        let mut buf = [0u8; 1];
        let err = awakener.socket.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
