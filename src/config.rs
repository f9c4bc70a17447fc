use std::time::Duration;

/// Poll backend selection. `Auto` probes the host platform the way
/// `ReactorFactory::initialize` does (epoll on Linux, kqueue on BSD/macOS,
/// event ports on illumos/Solaris, `poll()` everywhere else or when forced).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBackendKind {
    Auto,
    Epoll,
    Kqueue,
    EventPorts,
    Poll,
}

/// Process-wide startup parameters, mirroring the static fields
/// `ReactorFactory` carried in the original implementation.
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Number of worker reactors, not counting the dedicated timer reactor.
    pub reactor_count: usize,
    pub backend: PollBackendKind,
    /// Use edge-triggered epoll registration where the backend supports it.
    pub edge_triggered: bool,
    /// Whether this process is the authoritative source of proxy map updates.
    pub proxy_master: bool,
    pub bind_retries: u32,
    pub bind_retry_interval: Duration,
    pub ephemeral_port_range: std::ops::RangeInclusive<u16>,
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            reactor_count: num_cpus(),
            backend: PollBackendKind::Auto,
            edge_triggered: false,
            proxy_master: false,
            bind_retries: 24,
            bind_retry_interval: Duration::from_secs(10),
            ephemeral_port_range: 49152..=65535,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
