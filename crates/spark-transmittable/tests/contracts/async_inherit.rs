//! 异步任务、线程创建继承与传递参与者。

mod support;

use core::cell::RefCell;
use std::sync::Arc;
use std::thread;

use futures::executor::block_on;
use parking_lot::Mutex;
use spark_transmittable::future::TransmitFutureExt;
use spark_transmittable::inherit;
use spark_transmittable::{CopyPolicy, Transmittee};
use support::Harness;

#[test]
fn future_polled_on_another_thread_sees_submitter_context() {
    let harness = Harness::new();
    let trace = harness.slot::<u128>().build();
    trace.set(0xfeed);

    let reader = trace.clone();
    let task = async move { reader.get() }.transmitting_with(harness.transmitter.clone());
    let (inside, after) = thread::spawn(move || {
        let inside = block_on(task);
        (inside, trace.get())
    })
    .join()
    .expect("poller finished");
    assert_eq!(inside, Some(0xfeed));
    assert_eq!(after, None, "轮询线程在 poll 之后回到原状态");
}

#[test]
fn spawned_thread_inherits_through_child_policy() {
    let harness = Harness::new();
    let depth = harness
        .slot::<u32>()
        .copy_policy(CopyPolicy::shadow(|value: &u32| value + 100))
        .child_policy(CopyPolicy::shadow(|value: &u32| value + 1))
        .build();
    depth.set(1);

    let reader = depth.clone();
    let child = inherit::Builder::new()
        .transmitter(harness.transmitter.clone())
        .spawn(move || reader.get())
        .expect("spawn thread")
        .join()
        .expect("child finished");
    assert_eq!(child, Some(2), "继承使用 child_policy 而非 copy_policy");
    assert_eq!(depth.get(), Some(1));
}

thread_local! {
    static LEGACY_TENANT: RefCell<String> = RefCell::new(String::new());
}

#[test]
fn plain_thread_local_joins_the_protocol() {
    let harness = Harness::new();
    assert!(harness.registry.register_thread_local(
        &LEGACY_TENANT,
        CopyPolicy::Identity,
        false
    ));
    LEGACY_TENANT.with(|tenant| *tenant.borrow_mut() = "acme".to_owned());

    let snapshot = harness.transmitter.capture();
    assert_eq!(snapshot.participant_count(), 1);

    let transmitter = harness.transmitter.clone();
    let (inside, cleared, after) = thread::spawn(move || {
        LEGACY_TENANT.with(|tenant| *tenant.borrow_mut() = "worker".to_owned());
        let read = || LEGACY_TENANT.with(|tenant| tenant.borrow().clone());
        let inside = transmitter.run_with_captured(&snapshot, read);
        let cleared = transmitter.run_with_clear(read);
        (inside, cleared, read())
    })
    .join()
    .expect("worker finished");
    assert_eq!(inside, "acme");
    assert_eq!(cleared, "", "clear 把线程局部变量重置为默认值");
    assert_eq!(after, "worker");
    assert!(harness.registry.unregister_thread_local(&LEGACY_TENANT));
}

/// 记录每一步调用的外部子系统。
#[derive(Default)]
struct AuditTrail {
    events: Mutex<Vec<String>>,
}

impl Transmittee for AuditTrail {
    type Captured = &'static str;
    type Backup = &'static str;

    fn capture(&self) -> Self::Captured {
        self.events.lock().push("capture".to_owned());
        "captured"
    }

    fn replay(&self, captured: &Self::Captured) -> Self::Backup {
        self.events.lock().push(format!("replay:{captured}"));
        "replayed"
    }

    fn clear(&self) -> Self::Backup {
        self.events.lock().push("clear".to_owned());
        "cleared"
    }

    fn restore(&self, backup: Self::Backup) {
        self.events.lock().push(format!("restore:{backup}"));
    }
}

#[test]
fn custom_transmittee_sees_every_protocol_step() {
    let harness = Harness::new();
    let trail = Arc::new(AuditTrail::default());
    assert!(harness.registry.register_transmittee(Arc::clone(&trail)));
    assert!(!harness.registry.register_transmittee(Arc::clone(&trail)));

    let snapshot = harness.transmitter.capture();
    harness.transmitter.run_with_captured(&snapshot, || {});
    harness.transmitter.run_with_clear(|| {});

    assert_eq!(
        *trail.events.lock(),
        vec![
            "capture",
            "replay:captured",
            "restore:replayed",
            "clear",
            "restore:cleared"
        ]
    );
    assert!(harness.registry.unregister_transmittee(&trail));
    assert_eq!(harness.registry.participant_count(), 0);
}
