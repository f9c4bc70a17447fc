use std::collections::HashMap;
use std::net::{SocketAddrV4, TcpStream, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::address::CommAddress;
use crate::config::CommConfig;
use crate::error::{CommError, CommResult};
use crate::event::{CommEvent, DispatchHandler};
use crate::handler::datagram::DatagramHandler;
use crate::handler::listen::ListenHandler;
use crate::handler::raw::RawSocketCallback;
use crate::handler::raw::RawHandler;
use crate::handler::stream::StreamHandler;
use crate::handler::IoHandler;
use crate::header::CommHeader;
use crate::net;
use crate::proxy::ProxyEntry;
use crate::reactor_pool::ReactorPool;
use crate::ready::Ready;
use crate::token::Token;

static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(1);

fn next_request_id() -> u32 {
    loop {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Entry point to the communication subsystem: owns the reactor pool and
/// translates application calls (listen/connect/send/close/timers/proxy
/// admin) into handler map and reactor operations. Mirrors the role the
/// original `Comm` singleton played, but as an explicit value rather than a
/// process-wide singleton, so a process can run more than one independently
/// configured instance (e.g. in tests).
pub struct CommFacade {
    pool: ReactorPool,
    proxy_master: bool,
}

impl CommFacade {
    pub fn new(config: CommConfig) -> CommResult<CommFacade> {
        let proxy_master = config.proxy_master;
        let pool = ReactorPool::start(&config).map_err(CommError::from)?;
        Ok(CommFacade { pool, proxy_master })
    }

    pub fn handler_count(&self) -> usize {
        self.pool.handler_count()
    }

    pub fn reactor_count(&self) -> usize {
        self.pool.len()
    }

    pub fn uptime(&self) -> Duration {
        self.pool.uptime()
    }

    /// Registers an application-owned raw socket for polling, without this
    /// crate framing traffic on it.
    pub fn register_socket(
        &self,
        fd: std::os::unix::io::RawFd,
        addr: SocketAddrV4,
        callback: Box<dyn RawSocketCallback>,
    ) -> CommResult<()> {
        let handlers = self.pool.handlers();
        if handlers.lookup_by_addr(&addr).is_some() {
            return Err(CommError::AlreadyExists);
        }
        let handler: Arc<dyn IoHandler> = Arc::new(RawHandler::new(fd, CommAddress::inet(addr), callback));
        let token = handlers.insert_handler(addr, handler.clone());
        let reactor = self.pool.next_reactor();
        reactor
            .register(token, fd, handler.desired_interest())
            .map_err(CommError::from)
    }

    /// Establishes an outbound connection, dispatching received messages
    /// and connection lifecycle events to `dispatch`. Never blocks on the
    /// network: the connect syscall runs non-blocking, and if it returns
    /// `EINPROGRESS` the handler is registered for READ|WRITE and the
    /// `ConnectionEstablished` event fires later, once the owning reactor's
    /// thread observes the connect actually complete.
    pub fn connect(&self, addr: SocketAddrV4, dispatch: Arc<dyn DispatchHandler>) -> CommResult<()> {
        let handlers = self.pool.handlers();
        if handlers.lookup_by_addr(&addr).is_some() {
            return Err(CommError::AlreadyConnected);
        }

        let (stream, connected) = net::connect_nonblocking(addr)?;
        net::set_nodelay(&stream)?;
        let local_addr = net::local_addr(&stream)?;

        let fd = stream.as_raw_fd();
        let reactor = self.pool.next_reactor();
        let token = handlers.alloc_token();
        let handler: Arc<dyn IoHandler> = Arc::new(StreamHandler::new(
            stream,
            CommAddress::inet(local_addr),
            CommAddress::inet(addr),
            dispatch.clone(),
            reactor.request_table(),
            reactor.clone(),
            token,
            !connected,
        ));
        handlers.insert_with_token(token, addr, handler.clone());
        reactor.register(token, fd, handler.desired_interest()).map_err(CommError::from)?;

        if connected {
            dispatch.handle(CommEvent::ConnectionEstablished { addr: CommAddress::inet(addr) });
        }
        Ok(())
    }

    /// Adopts an already-connected stream (e.g. accepted by a listener),
    /// indexing it under its peer address so `send_request`/`send_response`
    /// can find it, delivering `ConnectionEstablished` to its dispatch and,
    /// if this process is the proxy master, handing it the current proxy
    /// table right away.
    fn adopt_stream(&self, stream: TcpStream, dispatch: Arc<dyn DispatchHandler>) -> CommResult<Token> {
        let peer_addr = match stream.peer_addr()? {
            std::net::SocketAddr::V4(addr) => addr,
            std::net::SocketAddr::V6(_) => return Err(CommError::ConnectError("ipv6 peer".into())),
        };
        let local_addr = net::local_addr(&stream)?;
        let fd = stream.as_raw_fd();
        let reactor = self.pool.next_reactor();
        let handlers = self.pool.handlers();
        let token = handlers.alloc_token();
        let handler: Arc<dyn IoHandler> = Arc::new(StreamHandler::new(
            stream,
            CommAddress::inet(local_addr),
            CommAddress::inet(peer_addr),
            dispatch.clone(),
            reactor.request_table(),
            reactor.clone(),
            token,
            false,
        ));
        handlers.insert_with_token(token, peer_addr, handler.clone());
        reactor.register(token, fd, handler.desired_interest()).map_err(CommError::from)?;

        dispatch.handle(CommEvent::ConnectionEstablished { addr: CommAddress::inet(peer_addr) });
        if self.proxy_master {
            let snapshot = handlers.proxy_snapshot();
            if !snapshot.is_empty() {
                crate::handler_map::HandlerMap::send_proxy_map(&handler, &snapshot);
            }
        }
        Ok(token)
    }

    /// Starts listening on `addr`. Every accepted connection is adopted as
    /// its own stream handler dispatching to `dispatch`.
    pub fn listen(&self, addr: SocketAddrV4, config: &CommConfig, dispatch: Arc<dyn DispatchHandler>) -> CommResult<()> {
        let listener = net::bind_with_retry(addr, config)?;
        listener.set_nonblocking(true).map_err(CommError::from)?;

        let local_addr = net::local_addr(&listener)?;
        let fd = listener.as_raw_fd();

        let listen_handler: Arc<dyn IoHandler> = Arc::new(ListenHandler::new(
            listener,
            CommAddress::inet(local_addr),
            dispatch,
        ));

        let handlers = self.pool.handlers();
        let token = handlers.insert_handler(local_addr, listen_handler.clone());
        let reactor = self.pool.next_reactor();
        reactor.register(token, fd, Ready::readable()).map_err(CommError::from)
    }

    /// Drains and adopts every connection currently pending on a listening
    /// socket previously registered with `listen`. Safe to call speculatively
    /// (returns `Ok(0)` if nothing was pending); an application typically
    /// calls it from a small poll loop on its own thread, the way the
    /// original drove accept readiness through the same reactor loop as
    /// data handlers.
    pub fn accept_pending(&self, listen_addr: &SocketAddrV4, dispatch: Arc<dyn DispatchHandler>) -> CommResult<usize> {
        let handlers = self.pool.handlers();
        let token = handlers
            .lookup_by_addr(listen_addr)
            .ok_or(CommError::NotConnected)?;
        let handler = handlers.checkout(token).ok_or(CommError::NotConnected)?;
        let listener = handler
            .as_any()
            .downcast_ref::<ListenHandler>()
            .ok_or_else(|| CommError::ListenError("not a listen handler".into()))?;

        let accepted = listener.accept_all();
        let count = accepted.len();
        for accepted in accepted {
            if let Err(e) = self.adopt_stream(accepted.stream, dispatch.clone()) {
                warn!("failed to adopt accepted connection from {}: {e}", accepted.peer_addr);
            }
        }
        handlers.release(token);
        Ok(count)
    }

    fn resolve(&self, addr: &CommAddress) -> CommResult<SocketAddrV4> {
        self.pool.handlers().translate_address(addr)
    }

    /// Sends a framed request. When `resp_handler` is given, the request is
    /// registered in the owning connection's request cache under a fresh id
    /// so the matching response (or a `CommEvent::Error { error:
    /// RequestTimeout }` after `timeout`, or `BrokenConnection` if the
    /// connection drops first) is delivered to `resp_handler` rather than
    /// the connection's default dispatch. With `resp_handler: None` the
    /// request is sent with `IGNORE_RESPONSE` set and id 0, fire-and-forget.
    pub fn send_request(
        &self,
        addr: &CommAddress,
        timeout: Duration,
        mut header: CommHeader,
        primary: Vec<u8>,
        extension: Vec<u8>,
        resp_handler: Option<Arc<dyn DispatchHandler>>,
    ) -> CommResult<u32> {
        let inet = self.resolve(addr)?;
        let handlers = self.pool.handlers();
        let token = handlers.lookup_by_addr(&inet).ok_or(CommError::NotConnected)?;
        let handler = handlers.checkout(token).ok_or(CommError::NotConnected)?;

        header.flags |= crate::header::flags::REQUEST;
        header.timeout_ms = timeout.as_millis() as u32;
        let id = match &resp_handler {
            Some(_) => {
                let id = next_request_id();
                header.id = id;
                id
            }
            None => {
                header.flags |= crate::header::flags::IGNORE_RESPONSE;
                header.id = 0;
                0
            }
        };

        let buf = crate::header::CommBuf::new(header, primary, extension);
        let sent = handler.send(buf);
        if sent {
            if let Some(resp_handler) = resp_handler {
                if let Some(table) = handler.request_table() {
                    table.lock().unwrap().insert(id, token, CommAddress::inet(inet), resp_handler, Instant::now() + timeout);
                }
            }
        } else {
            handlers.decommission_and_notify(token, &handler);
        }
        handlers.release(token);

        if sent {
            Ok(id)
        } else {
            Err(CommError::SendError(format!("failed to queue request to {addr}")))
        }
    }

    /// Sends a response, clearing the request flag so the receiver doesn't
    /// expect one back.
    pub fn send_response(&self, addr: &CommAddress, mut header: CommHeader, primary: Vec<u8>, extension: Vec<u8>) -> CommResult<()> {
        let inet = self.resolve(addr)?;
        let handlers = self.pool.handlers();
        let token = handlers.lookup_by_addr(&inet).ok_or(CommError::NotConnected)?;
        let handler = handlers.checkout(token).ok_or(CommError::NotConnected)?;

        header.flags &= !crate::header::flags::REQUEST;
        let buf = crate::header::CommBuf::new(header, primary, extension);
        let sent = handler.send(buf);
        if !sent {
            handlers.decommission_and_notify(token, &handler);
        }
        handlers.release(token);

        if sent {
            Ok(())
        } else {
            Err(CommError::SendError(format!("failed to send response to {addr}")))
        }
    }

    /// Creates a UDP socket bound to `addr` for unsolicited datagram
    /// traffic, dispatching received datagrams to `dispatch`.
    pub fn create_datagram_socket(&self, addr: SocketAddrV4, dispatch: Arc<dyn DispatchHandler>) -> CommResult<SocketAddrV4> {
        let socket = UdpSocket::bind(addr).map_err(|e| CommError::BindError(e.to_string()))?;
        socket.set_nonblocking(true).map_err(CommError::from)?;
        let local_addr = net::local_addr(&socket)?;
        let fd = socket.as_raw_fd();

        let handlers = self.pool.handlers();
        let reactor = self.pool.next_reactor();
        let token = handlers.alloc_token();
        let handler: Arc<dyn IoHandler> = Arc::new(DatagramHandler::new(
            socket,
            CommAddress::inet(local_addr),
            dispatch,
            reactor.clone(),
            token,
        ));
        handlers.insert_with_token(token, local_addr, handler.clone());
        reactor.register(token, fd, handler.desired_interest()).map_err(CommError::from)?;
        Ok(local_addr)
    }

    pub fn send_datagram(&self, via: &SocketAddrV4, dest: SocketAddrV4, header: CommHeader, primary: Vec<u8>, extension: Vec<u8>) -> CommResult<()> {
        let handlers = self.pool.handlers();
        let token = handlers.lookup_by_addr(via).ok_or(CommError::NotConnected)?;
        let handler = handlers.checkout(token).ok_or(CommError::NotConnected)?;
        let datagram = handler
            .as_any()
            .downcast_ref::<DatagramHandler>()
            .ok_or_else(|| CommError::SendError("not a datagram handler".into()))?;
        let buf = crate::header::CommBuf::new(header, primary, extension);
        datagram.send_to(dest, buf);
        handlers.release(token);
        Ok(())
    }

    /// Schedules `dispatch` to receive a `CommEvent::Timer` after `delay`
    /// on the dedicated timer reactor.
    pub fn set_timer(&self, delay: Duration, dispatch: Arc<dyn DispatchHandler>) -> Token {
        let token = Token(next_timer_token());
        self.pool.timer_reactor().add_timer(token, Instant::now() + delay, dispatch);
        token
    }

    pub fn cancel_timer(&self, token: Token) -> bool {
        self.pool.timer_reactor().cancel_timer(token)
    }

    /// Explicitly closes the handler at `addr`, delivering the same
    /// ERROR(BROKEN_CONNECTION)-then-DISCONNECT sequence a peer-initiated
    /// loss would, so callers with requests already in flight learn they
    /// will never be answered rather than waiting out their full timeout.
    pub fn close_socket(&self, addr: &SocketAddrV4) {
        let handlers = self.pool.handlers();
        if let Some(token) = handlers.lookup_by_addr(addr) {
            if let Some(handler) = handlers.checkout(token) {
                handlers.decommission_and_notify(token, &handler);
                handlers.release(token);
            }
        }
    }

    /// Must only be called when `proxy_master` is set: propagates a newly
    /// learned proxy binding and decommissions any connection whose proxy
    /// moved to a different address.
    pub fn add_proxy(&self, proxy: String, hostname: String, addr: SocketAddrV4) -> CommResult<()> {
        if !self.proxy_master {
            return Err(CommError::InvalidProxy("not a proxy master".into()));
        }
        self.pool.handlers().add_proxy(proxy, hostname, addr);
        Ok(())
    }

    /// Replaces the proxy table. A proxy moving to a new address only
    /// affects future resolutions (`translate_proxy`/`send_request` against
    /// that name); a connection already open against the proxy's old
    /// address is left running; it is addressed directly by inet address
    /// from this point on, not retroactively torn down.
    pub fn update_proxy_map(&self, mappings: HashMap<String, ProxyEntry>) {
        let diff = self.pool.handlers().update_proxy_map(mappings);
        for (proxy, entry) in diff.new {
            debug!("proxy {proxy} now resolves to {}", entry.addr);
        }
    }

    pub fn translate_proxy(&self, proxy: &str) -> Option<SocketAddrV4> {
        self.pool.handlers().translate_address(&CommAddress::proxy(proxy)).ok()
    }

    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

fn next_timer_token() -> usize {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed) as usize
}
