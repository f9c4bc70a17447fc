mod common;

use std::sync::Arc;
use std::time::Duration;

use commio::{CommAddress, CommEvent, CommFacade};

#[test]
fn proxy_reresolves_without_tearing_down_the_old_connection() {
    common::init_logging();

    let addr_a1 = common::loopback(common::free_port());
    let addr_a2 = common::loopback(common::free_port());

    let server_a1 = CommFacade::new(common::test_config()).unwrap();
    server_a1
        .listen(addr_a1, &common::test_config(), Arc::new(|_: CommEvent| {}))
        .unwrap();
    let server_a2 = CommFacade::new(common::test_config()).unwrap();
    server_a2
        .listen(addr_a2, &common::test_config(), Arc::new(|_: CommEvent| {}))
        .unwrap();

    let mut master_config = common::test_config();
    master_config.proxy_master = true;
    let master = CommFacade::new(master_config).unwrap();
    master.add_proxy("db1".into(), "host-a".into(), addr_a1).unwrap();
    assert_eq!(master.translate_proxy("db1"), Some(addr_a1));

    master.connect(addr_a1, Arc::new(|_: CommEvent| {})).unwrap();
    assert!(common::wait_until(Duration::from_millis(500), || master.handler_count() > 0));

    let resolved = master
        .send_request(
            &CommAddress::proxy("db1"),
            Duration::from_millis(1000),
            commio::CommHeader::new(1, 0),
            b"ping".to_vec(),
            vec![],
            None,
        )
        .is_ok();
    assert!(resolved, "send_request through the proxy name should resolve to A1");

    let handlers_before = master.handler_count();

    let mut mappings = std::collections::HashMap::new();
    mappings.insert(
        "db1".to_string(),
        commio::ProxyEntry { hostname: "host-a".into(), addr: addr_a2 },
    );
    master.update_proxy_map(mappings);

    assert_eq!(master.translate_proxy("db1"), Some(addr_a2));
    assert_eq!(
        master.handler_count(),
        handlers_before,
        "moving the proxy must not tear down the existing connection to A1"
    );

    let send_to_unconnected_a2_fails = master
        .send_request(
            &CommAddress::proxy("db1"),
            Duration::from_millis(1000),
            commio::CommHeader::new(1, 0),
            b"ping".to_vec(),
            vec![],
            None,
        )
        .is_err();
    assert!(
        send_to_unconnected_a2_fails,
        "proxy now resolves to A2 but master never connected there, so the send must fail to find a handler"
    );
}
