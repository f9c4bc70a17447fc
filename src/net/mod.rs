use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

use crate::config::CommConfig;
use crate::error::{CommError, CommResult};

/// Binds a listening socket, retrying on `EADDRINUSE` up to
/// `config.bind_retries` times with `config.bind_retry_interval` between
/// attempts, mirroring the retry loop the original reactor used for its
/// own interrupt socket.
pub fn bind_with_retry(addr: std::net::SocketAddrV4, config: &CommConfig) -> CommResult<TcpListener> {
    let mut attempts = 0;
    loop {
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && attempts < config.bind_retries => {
                attempts += 1;
                log::warn!("bind({addr}) in use, retry {attempts}/{}", config.bind_retries);
                thread::sleep(config.bind_retry_interval);
            }
            Err(err) => return Err(CommError::BindError(err.to_string())),
        }
    }
}

/// Begins an outbound connection the way the original reactor's `connect`
/// did: a non-blocking socket, `connect()` called directly rather than
/// through the blocking std helper, `EINPROGRESS` treated as "still
/// connecting" instead of an error. Returns the stream plus whether it
/// connected synchronously (rare, but possible for loopback peers) — when
/// it hasn't, the caller registers READ|WRITE interest and waits for the
/// owning reactor to observe writability and confirm success via
/// `TcpStream::take_error`.
pub fn connect_nonblocking(addr: std::net::SocketAddrV4) -> CommResult<(TcpStream, bool)> {
    let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0))
        .map_err(CommError::from)?;

    let mut nonblocking: libc::c_int = 1;
    if let Err(e) = syscall!(ioctl(fd, libc::FIONBIO, &mut nonblocking)) {
        unsafe { libc::close(fd) };
        return Err(CommError::from(e));
    }

    let sockaddr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() },
        sin_zero: [0; 8],
    };

    let res = unsafe {
        libc::connect(
            fd,
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };

    if res == 0 {
        return Ok((unsafe { <TcpStream as std::os::unix::io::FromRawFd>::from_raw_fd(fd) }, true));
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) => Ok((unsafe { <TcpStream as std::os::unix::io::FromRawFd>::from_raw_fd(fd) }, false)),
        _ => {
            unsafe { libc::close(fd) };
            Err(CommError::from(err))
        }
    }
}

pub fn set_nonblocking(stream: &TcpStream) -> CommResult<()> {
    stream.set_nonblocking(true).map_err(CommError::from)
}

pub fn set_nodelay(stream: &TcpStream) -> CommResult<()> {
    stream.set_nodelay(true).map_err(CommError::from)
}

/// Accepted-connection send/receive buffer size, matching the original
/// listener's `4 * 32768` setsockopt value.
const ACCEPT_BUFFER_SIZE: libc::c_int = 4 * 32768;

fn setsockopt<T, S: AsRawFd>(socket: &S, level: libc::c_int, name: libc::c_int, value: T) -> CommResult<()> {
    let res = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if res != 0 {
        return Err(CommError::from(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Enables SO_KEEPALIVE, matching the original listener's accept-path
/// setsockopt.
pub fn set_keepalive(stream: &TcpStream) -> CommResult<()> {
    setsockopt(stream, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1i32)
}

/// Sets both send and receive buffer sizes on an accepted connection.
pub fn set_accept_buffer_sizes(stream: &TcpStream) -> CommResult<()> {
    setsockopt(stream, libc::SOL_SOCKET, libc::SO_SNDBUF, ACCEPT_BUFFER_SIZE)?;
    setsockopt(stream, libc::SOL_SOCKET, libc::SO_RCVBUF, ACCEPT_BUFFER_SIZE)?;
    Ok(())
}

/// Returns the kernel-assigned local address of an fd-bearing socket,
/// analogous to the original `getsockname` call made from `IOHandler`'s
/// constructor.
pub fn local_addr<S: AsRawFd>(socket: &S) -> CommResult<std::net::SocketAddrV4> {
    use std::mem;
    unsafe {
        let mut storage: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let res = libc::getsockname(
            socket.as_raw_fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        );
        if res != 0 {
            return Err(CommError::from(std::io::Error::last_os_error()));
        }
        let ip = std::net::Ipv4Addr::from(u32::from_be(storage.sin_addr.s_addr));
        let port = u16::from_be(storage.sin_port);
        Ok(std::net::SocketAddrV4::new(ip, port))
    }
}

