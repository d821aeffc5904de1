//! Dispatch behaviour: ordering, reentrancy, gating and unregistration.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_events::{EventBus, Host, HostId, Scope, Subscription};
use tether_test::{Scenario, TestHost, TestMessage, TestMessage2, TestMessage3};

/// Host that keeps the counters its listeners update.
#[derive(Default)]
struct Counter {
    id: HostId,
    destroyed: AtomicBool,
    inactive: AtomicBool,
    total: AtomicUsize,
    nested: AtomicUsize,
    depth: AtomicUsize,
    message2: AtomicUsize,
    message3: AtomicUsize,
    log: Mutex<Vec<&'static str>>,
}

impl Counter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn nested(&self) -> usize {
        self.nested.load(Ordering::SeqCst)
    }

    /// Destroy the host and check nothing survives it.
    fn finish(&self, bus: &EventBus) {
        self.destroyed.store(true, Ordering::SeqCst);
        assert!(!bus.raise(TestMessage));
        assert!(!bus.is_leaking());
    }
}

impl Host for Counter {
    fn host_id(&self) -> HostId {
        self.id
    }

    fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }

    fn is_active_and_enabled(&self) -> bool {
        !self.inactive.load(Ordering::SeqCst)
    }
}

fn count(scope: &Scope<'_, Counter, ()>, _: &TestMessage) {
    scope.host.total.fetch_add(1, Ordering::SeqCst);
}

fn count_nested(scope: &Scope<'_, Counter, ()>, _: &TestMessage) {
    scope.host.nested.fetch_add(1, Ordering::SeqCst);
}

fn count_and_spawn(scope: &Scope<'_, Counter, ()>, msg: &TestMessage) {
    count(scope, msg);
    scope.bus.listen(scope.host, count).unwrap();
}

fn count_and_spawn_elsewhere(scope: &Scope<'_, Counter, ()>, msg: &TestMessage) {
    count(scope, msg);
    register_nested(scope.bus, scope.host);
}

fn register_nested(bus: &EventBus, host: &Arc<Counter>) {
    bus.listen(host, count_nested).unwrap();
}

#[test]
fn test_register_manual() {
    let bus = EventBus::new();
    let some_value = Arc::new(AtomicI32::new(666));

    let first = {
        let value = Arc::clone(&some_value);
        bus.listen_manual(move |_msg: &TestMessage| {
            value.fetch_add(1, Ordering::SeqCst);
        })
    };
    let second = {
        let value = Arc::clone(&some_value);
        bus.listen_manual(move |_msg: &TestMessage| {
            value.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(bus.raise(TestMessage));
    assert_eq!(some_value.load(Ordering::SeqCst), 668);

    first.dispose();
    assert!(bus.raise(TestMessage));
    assert_eq!(some_value.load(Ordering::SeqCst), 669);

    // Double dispose changes nothing.
    first.dispose();
    assert!(first.is_disposed());
    assert!(bus.raise(TestMessage));
    assert_eq!(some_value.load(Ordering::SeqCst), 670);

    second.dispose();
    assert!(!bus.raise(TestMessage));
    assert_eq!(some_value.load(Ordering::SeqCst), 670);
    assert!(!second.is_active());
}

#[test]
fn test_if_active_and_enabled() {
    let bus = EventBus::new();
    let host = TestHost::new("Test");

    // Ungated listeners ignore the enabled and active flags.
    let host_for_count = Counter::new();
    bus.listen(&host_for_count, count).unwrap();
    bus.listen(&host, |_, _msg: &TestMessage| {}).unwrap();
    assert!(bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 1);

    host_for_count.inactive.store(true, Ordering::SeqCst);
    host.set_enabled(false);
    assert!(bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 2);
    host.set_enabled(true);

    host.set_active(false);
    assert!(bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 3);
    host.set_active(true);
    host_for_count.inactive.store(false, Ordering::SeqCst);

    assert!(bus.unlisten::<TestMessage>(host_for_count.id));
    assert!(bus.unlisten::<TestMessage>(host.id()));
    assert!(!bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 3);

    // Gated listeners skip delivery while the host is inactive but stay
    // registered.
    bus.on(&host_for_count)
        .if_active_and_enabled()
        .listen(count)
        .unwrap();
    assert!(bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 4);

    host_for_count.inactive.store(true, Ordering::SeqCst);
    assert!(!bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 4);
    host_for_count.inactive.store(false, Ordering::SeqCst);

    assert!(bus.raise(TestMessage));
    assert_eq!(host_for_count.total(), 5);
    assert_eq!(bus.listener_count::<TestMessage>(), 1);

    // Same through the fixture host's flags.
    bus.on(&host)
        .if_active_and_enabled()
        .listen(|_, _msg: &TestMessage2| {})
        .unwrap();
    host.set_enabled(false);
    assert!(!bus.raise(TestMessage2));
    host.set_enabled(true);
    host.set_active(false);
    assert!(!bus.raise(TestMessage2));
    host.set_active(true);
    assert!(bus.raise(TestMessage2));

    host_for_count.finish(&bus);
}

#[test]
fn test_unregister() {
    let s = Scenario::new();
    let id = s.host.id();

    assert!(!s.bus.unlisten::<TestMessage>(id));
    assert!(!s.bus.raise(TestMessage));

    s.bus.listen(&s.host, |_, _msg: &TestMessage| {}).unwrap();
    assert!(s.bus.raise(TestMessage));
    assert!(s.bus.unlisten::<TestMessage>(id));
    assert!(!s.bus.raise(TestMessage));

    for _ in 0..4 {
        s.bus.listen(&s.host, |_, _msg: &TestMessage| {}).unwrap();
    }
    assert!(s.bus.raise(TestMessage));
    assert!(s.bus.unlisten::<TestMessage>(id));
    for _ in 0..3 {
        assert!(!s.bus.unlisten::<TestMessage>(id));
    }
    assert!(!s.bus.raise(TestMessage));

    s.bus.listen(&s.host, |_, _msg: &TestMessage| {}).unwrap();
    assert!(s.bus.unlisten::<TestMessage>(id));
    assert!(!s.bus.unlisten::<TestMessage>(id));
    assert!(!s.bus.unlisten::<TestMessage>(id));
    assert!(!s.bus.raise(TestMessage));

    s.finish(false);
}

#[test]
fn test_unlisten_keeps_other_types() {
    let s = Scenario::new();
    let id = s.host.id();

    s.bus.listen(&s.host, |_, _msg: &TestMessage| {}).unwrap();
    s.bus.listen(&s.host, |_, _msg: &TestMessage2| {}).unwrap();

    assert!(s.bus.unlisten::<TestMessage2>(id));
    assert!(!s.bus.raise(TestMessage2));
    assert_eq!(s.bus.listener_count::<TestMessage>(), 1);

    s.finish(true);
}

#[test]
fn test_nested_register_simple() {
    let bus = EventBus::new();
    let host = Counter::new();

    // Two listeners up front: one that spawns a counting listener per raise
    // and one that only counts. A spawned listener joins from the next raise,
    // so a lone spawner would give 1, 3, 6.
    bus.listen(&host, count_and_spawn).unwrap();
    bus.listen(&host, count).unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 2);
    assert_eq!(bus.listener_count::<TestMessage>(), 3);

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 5);

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 9);

    host.finish(&bus);
}

#[test]
fn test_nested_register_simple_manual() {
    let bus = EventBus::new();
    let total = Arc::new(AtomicUsize::new(0));
    let handlers: Arc<Mutex<Vec<Subscription>>> = Arc::default();

    // Spawner plus one plain listener, as with host-bound listeners.
    let spawner = {
        let bus_handle = bus.clone();
        let total = Arc::clone(&total);
        let handlers = Arc::clone(&handlers);
        bus.listen_manual(move |_msg: &TestMessage| {
            total.fetch_add(1, Ordering::SeqCst);
            let inner_total = Arc::clone(&total);
            let sub = bus_handle.listen_manual(move |_msg: &TestMessage| {
                inner_total.fetch_add(1, Ordering::SeqCst);
            });
            handlers.lock().unwrap().push(sub);
        })
    };
    let plain = {
        let total = Arc::clone(&total);
        bus.listen_manual(move |_msg: &TestMessage| {
            total.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(bus.raise(TestMessage));
    assert_eq!(total.load(Ordering::SeqCst), 2);

    assert!(bus.raise(TestMessage));
    assert_eq!(total.load(Ordering::SeqCst), 5);

    assert!(bus.raise(TestMessage));
    assert_eq!(total.load(Ordering::SeqCst), 9);

    spawner.dispose();
    plain.dispose();
    for handler in handlers.lock().unwrap().iter() {
        handler.dispose();
    }
    assert!(!bus.raise(TestMessage));
    assert!(bus.is_empty());
    assert!(!bus.is_leaking());
}

fn raise_until_ten(scope: &Scope<'_, Counter, ()>, msg: &TestMessage) {
    count(scope, msg);
    let depth = scope.host.depth.fetch_add(1, Ordering::SeqCst).saturating_add(1);
    if depth < 10 {
        assert!(scope.bus.raise(TestMessage));
    }
    scope.host.depth.fetch_sub(1, Ordering::SeqCst);
}

#[test]
fn test_nested_raise_simple() {
    let bus = EventBus::new();
    let host = Counter::new();
    bus.listen(&host, raise_until_ten).unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 10);
    assert_eq!(host.depth.load(Ordering::SeqCst), 0);

    host.finish(&bus);
}

#[test]
fn test_nested_raise_simple_manual() {
    let bus = EventBus::new();
    let total = Arc::new(AtomicUsize::new(0));
    let depth = Arc::new(AtomicUsize::new(0));

    let handler = {
        let bus_handle = bus.clone();
        let total = Arc::clone(&total);
        let depth = Arc::clone(&depth);
        bus.listen_manual(move |_msg: &TestMessage| {
            total.fetch_add(1, Ordering::SeqCst);
            if depth.fetch_add(1, Ordering::SeqCst) < 9 {
                bus_handle.raise(TestMessage);
            }
            depth.fetch_sub(1, Ordering::SeqCst);
        })
    };

    assert!(bus.raise(TestMessage));
    assert_eq!(total.load(Ordering::SeqCst), 10);

    handler.dispose();
    assert!(!bus.raise(TestMessage));
}

fn message2_unlistens_first(scope: &Scope<'_, Counter, ()>, _: &TestMessage2) {
    scope.host.message2.fetch_add(1, Ordering::SeqCst);
    scope.bus.unlisten::<TestMessage>(scope.host.host_id());
}

fn message3_unlistens_itself(scope: &Scope<'_, Counter, ()>, _: &TestMessage3) {
    scope.host.message3.fetch_add(1, Ordering::SeqCst);
    scope.bus.unlisten::<TestMessage3>(scope.host.host_id());
    scope.bus.raise(TestMessage);
}

fn raise_everything(scope: &Scope<'_, Counter, ()>, msg: &TestMessage) {
    count(scope, msg);
    let depth = scope.host.depth.fetch_add(1, Ordering::SeqCst).saturating_add(1);
    if depth >= 10 {
        for _ in 0..3 {
            scope.bus.raise(TestMessage2);
            scope.bus.raise(TestMessage3);
        }
    }
    scope.bus.raise(TestMessage);
}

#[test]
fn test_nested_messed_up() {
    let bus = EventBus::new();
    let host = Counter::new();

    bus.listen(&host, message2_unlistens_first).unwrap();
    bus.listen(&host, message3_unlistens_itself).unwrap();
    bus.listen(&host, raise_everything).unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 10);
    assert_eq!(host.message2.load(Ordering::SeqCst), 3);
    assert_eq!(host.message3.load(Ordering::SeqCst), 1);

    assert!(!bus.raise(TestMessage));
    assert!(!bus.raise(TestMessage3));
    assert!(bus.raise(TestMessage2));
    assert_eq!(bus.listener_count::<TestMessage>(), 0);

    host.finish(&bus);
}

#[test]
fn test_nested_raise_contexts() {
    let bus = EventBus::new();
    let host = Counter::new();

    // Spawner plus one pre-registered nested listener, as in
    // `test_nested_register_simple`.
    bus.listen(&host, count_and_spawn_elsewhere).unwrap();
    register_nested(&bus, &host);

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total() + host.nested(), 2);

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total() + host.nested(), 5);

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total() + host.nested(), 9);
    assert_eq!(host.total(), 3);

    host.finish(&bus);
}

#[test]
fn test_registration_order() {
    let bus = EventBus::new();
    let host = Counter::new();

    for label in ["A", "B", "C"] {
        bus.on(&host)
            .capture(label)
            .listen(|scope, _msg: &TestMessage| {
                scope.host.log.lock().unwrap().push(*scope.captured);
            })
            .unwrap();
    }

    assert!(bus.raise(TestMessage));
    assert!(bus.raise(TestMessage));
    assert_eq!(
        *host.log.lock().unwrap(),
        vec!["A", "B", "C", "A", "B", "C"]
    );

    host.finish(&bus);
}

#[test]
fn test_nested_raise_completes_before_outer_continues() {
    let bus = EventBus::new();
    let host = Counter::new();

    bus.on(&host)
        .capture("outer-1")
        .listen(|scope, _msg: &TestMessage| {
            scope.host.log.lock().unwrap().push(*scope.captured);
            assert!(scope.bus.raise(TestMessage2));
        })
        .unwrap();
    bus.on(&host)
        .capture("outer-2")
        .listen(|scope, _msg: &TestMessage| {
            scope.host.log.lock().unwrap().push(*scope.captured);
        })
        .unwrap();
    for label in ["inner-1", "inner-2"] {
        bus.on(&host)
            .capture(label)
            .listen(|scope, _msg: &TestMessage2| {
                scope.host.log.lock().unwrap().push(*scope.captured);
            })
            .unwrap();
    }

    assert!(bus.raise(TestMessage));
    assert_eq!(
        *host.log.lock().unwrap(),
        vec!["outer-1", "inner-1", "inner-2", "outer-2"]
    );

    host.finish(&bus);
}

#[test]
fn test_unlisten_later_listener_mid_frame() {
    let bus = EventBus::new();
    let first = TestHost::new("first");
    let second = TestHost::new("second");

    bus.on(&first)
        .capture(second.id())
        .listen(|scope, _msg: &TestMessage| {
            assert!(scope.bus.unlisten_all(*scope.captured));
        })
        .unwrap();
    bus.listen(&second, |_, _msg: &TestMessage| {
        panic!("unregistered listener invoked");
    })
    .unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(bus.listener_count::<TestMessage>(), 1);
    assert!(bus.raise(TestMessage));
}

#[test]
fn test_dispose_later_manual_listener_mid_frame() {
    let bus = EventBus::new();
    let later: Arc<Mutex<Option<Subscription>>> = Arc::default();
    let later_calls = Arc::new(AtomicUsize::new(0));

    let _first = {
        let later = Arc::clone(&later);
        bus.listen_manual(move |_msg: &TestMessage| {
            if let Some(sub) = later.lock().unwrap().as_ref() {
                sub.dispose();
            }
        })
    };
    let sub = {
        let later_calls = Arc::clone(&later_calls);
        bus.listen_manual(move |_msg: &TestMessage| {
            later_calls.fetch_add(1, Ordering::SeqCst);
        })
    };
    *later.lock().unwrap() = Some(sub);

    assert!(bus.raise(TestMessage));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_prune_and_clear_mid_frame() {
    let bus = EventBus::new();
    let later_calls = Arc::new(AtomicUsize::new(0));
    let pruned = Arc::new(AtomicUsize::new(usize::MAX));

    let _resetter = {
        let bus_handle = bus.clone();
        let pruned = Arc::clone(&pruned);
        bus.listen_manual(move |_msg: &TestMessage| {
            bus_handle.clear();
            pruned.store(bus_handle.prune(), Ordering::SeqCst);
            assert!(bus_handle.is_empty());
        })
    };
    let _later = {
        let later_calls = Arc::clone(&later_calls);
        bus.listen_manual(move |_msg: &TestMessage| {
            later_calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(bus.raise(TestMessage));
    assert_eq!(pruned.load(Ordering::SeqCst), 0);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    assert!(bus.is_empty());
    assert!(!bus.raise(TestMessage));

    // The registry accepts new listeners after the reset.
    let _fresh = {
        let later_calls = Arc::clone(&later_calls);
        bus.listen_manual(move |_msg: &TestMessage| {
            later_calls.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(bus.raise(TestMessage));
    assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count::<TestMessage>(), 1);
}

#[test]
fn test_prune_mid_frame_keeps_frame_intact() {
    let bus = EventBus::new();
    let host = Counter::new();
    let victim = TestHost::new("victim");

    bus.on(&host)
        .capture(victim.id())
        .listen(|scope, _msg: &TestMessage| {
            scope.host.total.fetch_add(1, Ordering::SeqCst);
            assert!(scope.bus.unlisten_all(*scope.captured));
            assert_eq!(scope.bus.prune(), 0);
        })
        .unwrap();
    bus.listen(&victim, |_, _msg: &TestMessage| {
        panic!("unregistered listener invoked");
    })
    .unwrap();
    bus.listen(&host, count).unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 2);
    assert_eq!(bus.listener_count::<TestMessage>(), 2);
    assert_eq!(bus.len(), 2);

    host.finish(&bus);
}

fn unlisten_self_then_raise(scope: &Scope<'_, Counter, ()>, msg: &TestMessage) {
    count(scope, msg);
    assert!(scope.bus.unlisten::<TestMessage>(scope.host.host_id()));
    assert!(!scope.bus.raise(TestMessage));
}

#[test]
fn test_self_unlisten_not_reinvoked_by_nested_raise() {
    let bus = EventBus::new();
    let host = Counter::new();
    bus.listen(&host, unlisten_self_then_raise).unwrap();

    assert!(bus.raise(TestMessage));
    assert_eq!(host.total(), 1);
    assert!(!bus.raise(TestMessage));
    assert_eq!(host.total(), 1);

    host.finish(&bus);
}

#[test]
fn test_handler_panic_propagates() {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = bus.listen_manual(|_msg: &TestMessage| panic!("handler failed"));
    let _counting = {
        let calls = Arc::clone(&calls);
        bus.listen_manual(move |_msg: &TestMessage| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    let result = catch_unwind(AssertUnwindSafe(|| bus.raise(TestMessage)));
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    failing.dispose();
    assert!(bus.raise(TestMessage));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_host_dropped_without_destroy() {
    let bus = EventBus::new();
    let host = TestHost::new("dropped");
    let weak = Arc::downgrade(&host);
    bus.listen(&host, |_, _msg: &TestMessage| {}).unwrap();

    drop(host);
    assert!(weak.upgrade().is_none());
    assert!(!bus.raise(TestMessage));
    assert!(!bus.is_leaking());
    assert!(bus.is_empty());
}

#[test]
fn test_destroyed_host_is_leak_until_swept() {
    let bus = EventBus::new();
    let host = TestHost::new("destroyed");
    bus.listen(&host, |_, _msg: &TestMessage| {}).unwrap();

    host.destroy();
    assert_eq!(bus.leaking_hosts(), vec![host.id()]);
    assert_eq!(bus.prune(), 1);
    assert!(!bus.is_leaking());
}

#[test]
fn test_global_bus() {
    struct GlobalOnly;

    let bus = EventBus::global();
    let host = TestHost::new("global");
    bus.listen(&host, |_, _msg: &GlobalOnly| {}).unwrap();

    assert!(EventBus::global().raise(GlobalOnly));
    assert!(bus.unlisten::<GlobalOnly>(host.id()));
    assert!(!EventBus::global().raise(GlobalOnly));
}
