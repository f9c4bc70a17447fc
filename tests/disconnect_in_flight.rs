mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commio::{CommAddress, CommErrorCode, CommEvent, CommFacade, CommHeader};

#[test]
fn killed_peer_delivers_one_disconnect_and_one_error_per_pending_request() {
    common::init_logging();

    let addr = common::loopback(common::free_port());

    let server = Arc::new(CommFacade::new(common::test_config()).unwrap());
    server
        .listen(addr, &common::test_config(), Arc::new(|_: CommEvent| {}))
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let acceptor = {
        let server = server.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let _ = server.accept_pending(&addr, Arc::new(|_: CommEvent| {}));
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let disconnect_count = Arc::new(AtomicUsize::new(0));
    let client_dispatch: Arc<dyn commio::DispatchHandler> = {
        let disconnect_count = disconnect_count.clone();
        Arc::new(move |event: CommEvent| {
            if let CommEvent::Disconnect { .. } = event {
                disconnect_count.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let client = CommFacade::new(common::test_config()).unwrap();
    client.connect(addr, client_dispatch).unwrap();
    assert!(common::wait_until(Duration::from_millis(500), || {
        client.handler_count() > 0 && server.handler_count() > 0
    }));

    let request_errors: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let mut ids = Vec::new();
    for counter in &request_errors {
        let counter = counter.clone();
        let handler: Arc<dyn commio::DispatchHandler> = Arc::new(move |event: CommEvent| {
            if let CommEvent::Error { error: CommErrorCode::BrokenConnection, .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let header = CommHeader::new(1, 0);
        let id = client
            .send_request(
                &CommAddress::inet(addr),
                Duration::from_millis(5000),
                header,
                b"r".to_vec(),
                vec![],
                Some(handler),
            )
            .unwrap();
        ids.push(id);
    }

    // simulate the server handler being killed out from under the client
    stop.store(true, Ordering::Relaxed);
    acceptor.join().unwrap();
    Arc::try_unwrap(server).ok().unwrap().shutdown();

    assert!(common::wait_until(Duration::from_millis(500), || {
        request_errors.iter().all(|c| c.load(Ordering::SeqCst) == 1)
    }));
    for counter in &request_errors {
        assert_eq!(counter.load(Ordering::SeqCst), 1, "each request callback must fire exactly once");
    }

    // give a generous settling window to rule out a second, spurious DISCONNECT
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(disconnect_count.load(Ordering::SeqCst), 1);
}
