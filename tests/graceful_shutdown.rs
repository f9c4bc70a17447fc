mod common;

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commio::{CommAddress, CommErrorCode, CommEvent, CommFacade, CommHeader};

/// Ten peers connect to one server, three of which the server has an
/// outstanding request against; `CommFacade::shutdown` must then notify
/// every pending request with BROKEN_CONNECTION, every accepted
/// connection's default dispatch with exactly one DISCONNECT, and return
/// once every handler has actually been dropped.
#[test]
fn shutdown_drains_every_handler_and_notifies_every_pending_request() {
    common::init_logging();

    let addr = common::loopback(common::free_port());

    let server = Arc::new(CommFacade::new(common::test_config()).unwrap());
    let disconnects = Arc::new(AtomicUsize::new(0));
    let server_dispatch: Arc<dyn commio::DispatchHandler> = {
        let disconnects = disconnects.clone();
        Arc::new(move |event: CommEvent| {
            if let CommEvent::Disconnect { .. } = event {
                disconnects.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    server
        .listen(addr, &common::test_config(), Arc::new(|_: CommEvent| {}))
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let acceptor = {
        let server = server.clone();
        let stop = stop.clone();
        let dispatch = server_dispatch.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let _ = server.accept_pending(&addr, dispatch.clone());
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };

    // ten bare peers, kept alive for the whole test so the server's
    // shutdown (not a peer-initiated close) is what triggers DISCONNECT.
    let peers: Vec<(TcpStream, std::net::SocketAddrV4)> = (0..10)
        .map(|_| {
            let stream = TcpStream::connect(addr).unwrap();
            let local = match stream.local_addr().unwrap() {
                std::net::SocketAddr::V4(a) => a,
                _ => unreachable!(),
            };
            (stream, local)
        })
        .collect();

    assert!(common::wait_until(Duration::from_secs(1), || server.handler_count() == 10));

    let request_errors: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (counter, (_, peer_addr)) in request_errors.iter().zip(peers.iter()) {
        let counter = counter.clone();
        let handler: Arc<dyn commio::DispatchHandler> = Arc::new(move |event: CommEvent| {
            if let CommEvent::Error { error: CommErrorCode::BrokenConnection, .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        server
            .send_request(
                &CommAddress::inet(*peer_addr),
                Duration::from_millis(5000),
                CommHeader::new(1, 0),
                b"r".to_vec(),
                vec![],
                Some(handler),
            )
            .unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    acceptor.join().unwrap();

    Arc::try_unwrap(server).ok().unwrap().shutdown();

    for counter in &request_errors {
        assert_eq!(counter.load(Ordering::SeqCst), 1, "every pending request must get exactly one BROKEN_CONNECTION");
    }
    assert_eq!(disconnects.load(Ordering::SeqCst), 10, "every one of the ten accepted connections must get exactly one DISCONNECT");

    drop(peers);
}
