mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use commio::{CommAddress, CommErrorCode, CommEvent, CommFacade, CommHeader};

/// Server accepts but never answers, simulating a stalled peer.
#[test]
fn request_times_out_and_connection_stays_usable() {
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

    let client = CommFacade::new(common::test_config()).unwrap();
    client.connect(addr, Arc::new(|_: CommEvent| {})).unwrap();
    assert!(common::wait_until(Duration::from_millis(500), || client.handler_count() > 0));

    let error: Arc<Mutex<Option<CommErrorCode>>> = Arc::new(Mutex::new(None));
    let resp_handler: Arc<dyn commio::DispatchHandler> = {
        let error = error.clone();
        Arc::new(move |event: CommEvent| {
            if let CommEvent::Error { error: code, .. } = event {
                *error.lock().unwrap() = Some(code);
            }
        })
    };

    let header = CommHeader::new(1, 0);
    client
        .send_request(
            &CommAddress::inet(addr),
            Duration::from_millis(200),
            header,
            b"slow".to_vec(),
            vec![],
            Some(resp_handler),
        )
        .unwrap();

    assert!(common::wait_until(Duration::from_millis(400), || error.lock().unwrap().is_some()));
    assert_eq!(*error.lock().unwrap(), Some(CommErrorCode::RequestTimeout));

    // the connection itself must still be usable afterwards
    let second_reply: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let second_handler: Arc<dyn commio::DispatchHandler> = {
        let second_reply = second_reply.clone();
        Arc::new(move |event: CommEvent| {
            if let CommEvent::Error { error: CommErrorCode::RequestTimeout, .. } = event {
                *second_reply.lock().unwrap() = true;
            }
        })
    };
    let header2 = CommHeader::new(1, 0);
    client
        .send_request(
            &CommAddress::inet(addr),
            Duration::from_millis(50),
            header2,
            b"slow-again".to_vec(),
            vec![],
            Some(second_handler),
        )
        .expect("connection should still accept new requests after a prior timeout");

    assert!(common::wait_until(Duration::from_millis(300), || *second_reply.lock().unwrap()));

    stop.store(true, Ordering::Relaxed);
    acceptor.join().unwrap();
}
