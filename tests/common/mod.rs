use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::time::{Duration, Instant};

use commio::CommConfig;

/// Grabs a loopback port the kernel currently considers free. There is a
/// window between dropping this listener and the caller binding the same
/// port, same as any test relying on an ephemeral port handed back early.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

pub fn loopback(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

/// A couple of reactors per facade is enough to exercise round-robin
/// assignment without burning a thread per CPU in every test process.
pub fn test_config() -> CommConfig {
    let mut config = CommConfig::default();
    config.reactor_count = 2;
    config
}

/// Busy-polls `check` until it returns `true` or `timeout` elapses. Used in
/// place of a condvar since assertions here are about reactor-thread
/// delivered state, not anything this thread can wait on directly.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
