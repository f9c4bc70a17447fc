mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use commio::{CommEvent, CommFacade};

/// The timer reactor starts out blocked in an indefinite poll wait (no
/// handlers, no timers). Scheduling a timer from another thread must
/// interrupt that wait promptly rather than waiting for some unrelated
/// readiness event to wake the loop up.
#[test]
fn timer_set_while_reactor_blocked_indefinitely_fires_promptly() {
    common::init_logging();

    let facade = CommFacade::new(common::test_config()).unwrap();

    // give the reactor threads a moment to reach their first, indefinite wait
    std::thread::sleep(Duration::from_millis(20));

    let fired = Arc::new(AtomicBool::new(false));
    let start = Instant::now();
    {
        let fired = fired.clone();
        facade.set_timer(
            Duration::from_millis(10),
            Arc::new(move |event: CommEvent| {
                if matches!(event, CommEvent::Timer) {
                    fired.store(true, Ordering::SeqCst);
                }
            }),
        );
    }

    assert!(common::wait_until(Duration::from_millis(50), || fired.load(Ordering::SeqCst)));
    assert!(start.elapsed() < Duration::from_millis(50));

    // a second timer scheduled while the first is already pending must also
    // fire on its own schedule, not be dropped by the interrupt coalescing
    let fired2 = Arc::new(AtomicBool::new(false));
    {
        let fired2 = fired2.clone();
        facade.set_timer(
            Duration::from_millis(5),
            Arc::new(move |event: CommEvent| {
                if matches!(event, CommEvent::Timer) {
                    fired2.store(true, Ordering::SeqCst);
                }
            }),
        );
    }
    assert!(common::wait_until(Duration::from_millis(50), || fired2.load(Ordering::SeqCst)));
}
