mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use commio::{CommAddress, CommEvent, CommFacade, CommHeader};

#[test]
fn request_gets_matching_response_and_cache_entry_is_cleared() {
    common::init_logging();

    let addr = common::loopback(common::free_port());

    let server = Arc::new(CommFacade::new(common::test_config()).unwrap());
    let server_dispatch: Arc<dyn commio::DispatchHandler> = {
        let server = server.clone();
        Arc::new(move |event: CommEvent| {
            if let CommEvent::Message { addr, header, payload } = event {
                assert_eq!(&*payload, b"ping");
                let resp = CommHeader::new(header.command, header.id);
                server.send_response(&addr, resp, b"pong".to_vec(), vec![]).unwrap();
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

    let client = CommFacade::new(common::test_config()).unwrap();
    client.connect(addr, Arc::new(|_: CommEvent| {})).unwrap();

    assert!(common::wait_until(Duration::from_millis(500), || {
        client.handler_count() > 0 && server.handler_count() > 0
    }));

    let reply: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let reply_id: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
    let resp_handler: Arc<dyn commio::DispatchHandler> = {
        let reply = reply.clone();
        let reply_id = reply_id.clone();
        Arc::new(move |event: CommEvent| match event {
            CommEvent::Message { header, payload, .. } => {
                *reply.lock().unwrap() = Some((*payload).clone());
                *reply_id.lock().unwrap() = Some(header.id);
            }
            other => panic!("unexpected event on response callback: {other:?}"),
        })
    };

    let header = CommHeader::new(1, 0);
    let id = client
        .send_request(
            &CommAddress::inet(addr),
            Duration::from_millis(1000),
            header,
            b"ping".to_vec(),
            vec![],
            Some(resp_handler),
        )
        .unwrap();

    assert!(common::wait_until(Duration::from_millis(500), || reply.lock().unwrap().is_some()));
    assert_eq!(reply.lock().unwrap().as_deref(), Some(&b"pong"[..]));
    assert_eq!(*reply_id.lock().unwrap(), Some(id));

    stop.store(true, Ordering::Relaxed);
    acceptor.join().unwrap();
}
