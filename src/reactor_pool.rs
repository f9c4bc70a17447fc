use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::info;

use crate::config::CommConfig;
use crate::handler_map::HandlerMap;
use crate::reactor::Reactor;

/// Pool of worker reactors plus one reactor dedicated to timers, mirroring
/// `ReactorFactory`'s static vector where the last entry served that role.
/// Handlers are assigned to worker reactors round-robin; the timer reactor
/// never owns application sockets, only timer registrations, so its poll
/// wait is never starved by I/O traffic.
pub struct ReactorPool {
    workers: Vec<Arc<Reactor>>,
    timer_reactor: Arc<Reactor>,
    threads: Vec<JoinHandle<()>>,
    next_worker: AtomicUsize,
    handlers: Arc<HandlerMap>,
}

impl ReactorPool {
    pub fn start(config: &CommConfig) -> io::Result<ReactorPool> {
        let handlers = Arc::new(HandlerMap::new());
        let mut workers = Vec::with_capacity(config.reactor_count);
        let mut threads = Vec::with_capacity(config.reactor_count + 1);

        for i in 0..config.reactor_count {
            let reactor = Arc::new(Reactor::new(handlers.clone(), config)?);
            workers.push(reactor.clone());
            threads.push(
                std::thread::Builder::new()
                    .name(format!("commio-reactor-{i}"))
                    .spawn(move || reactor.run())?,
            );
        }

        let timer_reactor = Arc::new(Reactor::new(handlers.clone(), config)?);
        threads.push({
            let reactor = timer_reactor.clone();
            std::thread::Builder::new()
                .name("commio-timer".to_string())
                .spawn(move || reactor.run())?
        });

        info!("started {} worker reactors + 1 timer reactor", config.reactor_count);

        Ok(ReactorPool {
            workers,
            timer_reactor,
            threads,
            next_worker: AtomicUsize::new(0),
            handlers,
        })
    }

    pub fn handlers(&self) -> &Arc<HandlerMap> {
        &self.handlers
    }

    /// Picks the next worker reactor in round-robin order. Not exposed
    /// outside the crate: `Reactor` is an implementation detail behind
    /// `CommFacade`.
    pub(crate) fn next_reactor(&self) -> &Arc<Reactor> {
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[idx]
    }

    pub(crate) fn timer_reactor(&self) -> &Arc<Reactor> {
        &self.timer_reactor
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// How long the pool's first worker reactor has been running, a crude
    /// but sufficient proxy for whole-pool uptime since all reactors start
    /// within the same `start()` call.
    pub fn uptime(&self) -> std::time::Duration {
        self.workers[0].uptime()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.handler_count()
    }

    /// Signals every reactor to stop and blocks until all handlers have
    /// been purged and every reactor thread has exited.
    ///
    /// Decommissioning only flags handlers; each reactor only purges them on
    /// its next loop iteration, so every reactor is interrupted to force
    /// that iteration before `wait_empty` is given a chance to return.
    pub fn shutdown(self) {
        self.handlers.decommission_all_and_notify();
        for reactor in self.workers.iter().chain(std::iter::once(&self.timer_reactor)) {
            reactor.interrupt();
        }
        self.handlers.wait_empty();
        for reactor in self.workers.iter().chain(std::iter::once(&self.timer_reactor)) {
            reactor.stop();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_configured_worker_count_and_round_robins() {
        let mut config = CommConfig::default();
        config.reactor_count = 3;
        let pool = ReactorPool::start(&config).unwrap();
        assert_eq!(pool.len(), 3);

        let a = Arc::as_ptr(pool.next_reactor());
        let b = Arc::as_ptr(pool.next_reactor());
        let c = Arc::as_ptr(pool.next_reactor());
        let d = Arc::as_ptr(pool.next_reactor());
        assert_eq!(a, d);
        assert_ne!(a, b);
        assert_ne!(b, c);

        pool.shutdown();
    }
}
