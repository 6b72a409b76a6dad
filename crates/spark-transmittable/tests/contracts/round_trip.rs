//! 捕获/重放/恢复往返契约。
//!
//! # 覆盖范围（What）
//! - 往返恒等：重放后读到提交方的值，恢复后读回工作线程原值；
//! - 提交方隔离：浅拷贝/深拷贝策略下任务内的写入不会回流到提交方；
//! - null 语义：忽略 null 时槽位缺席、工作线程重新物化默认值；不忽略时显式 null 原样传递；
//! - 注册表变化：捕获之后注册/注销的槽位分别缺席/不复活。

mod support;

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use spark_transmittable::runtime::{Executor, FixedThreadPool};
use spark_transmittable::{ContextSlot, SlotState, TtlRunnable, WrapOptions};
use support::{Harness, on_worker};

/// 池中工作线程自带陈旧值，任务结束后必须回到该陈旧值。
///
/// # 测试步骤（How）
/// 1. 以浅拷贝策略构建 `ctx`，先在唯一的工作线程上写入 `"worker-stale"`；
/// 2. 提交方写入 `"parent"` 并包装任务：任务读取值、改写为 `"child"`，把两次读数交回；
/// 3. 任务结束后分别在工作线程与提交方读取。
#[test]
fn pooled_worker_returns_to_its_stale_value() {
    let harness = Harness::new();
    let ctx = harness.slot::<String>().shadow_copy(String::clone).build();
    let pool = FixedThreadPool::new(1).expect("spawn worker");

    let worker_ctx = ctx.clone();
    on_worker(&pool, move || worker_ctx.set("worker-stale".to_owned()));

    ctx.set("parent".to_owned());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let task = {
        let ctx = ctx.clone();
        let observed = Arc::clone(&observed);
        TtlRunnable::wrap_with(
            harness.transmitter.clone(),
            Arc::new(move || {
                let seen = ctx.get();
                ctx.set("child".to_owned());
                observed.lock().extend([seen, ctx.get()]);
            }),
            WrapOptions::new(),
        )
        .expect("plain task")
    };
    pool.execute(task).expect("pool accepts tasks");

    let worker_ctx = ctx.clone();
    let after = on_worker(&pool, move || worker_ctx.get());
    assert_eq!(
        *observed.lock(),
        vec![Some("parent".to_owned()), Some("child".to_owned())]
    );
    assert_eq!(after.as_deref(), Some("worker-stale"), "工作线程必须回到任务前的值");
    assert_eq!(ctx.get().as_deref(), Some("parent"), "提交方不受任务写入影响");
}

#[test]
fn manual_protocol_round_trip_on_another_thread() {
    let harness = Harness::new();
    let trace = harness.slot::<u32>().name("trace").build();
    let absent = harness.slot::<u32>().build();
    trace.set(7);

    let snapshot = harness.transmitter.capture();
    assert!(snapshot.contains(&trace));
    assert!(!snapshot.contains(&absent), "未设置的槽位不进入快照");

    let transmitter = harness.transmitter.clone();
    let (trace_seen, absent_seen, restored) = thread::spawn(move || {
        trace.set(100);
        absent.set(200);
        let backup = transmitter.replay(&snapshot);
        let seen = (trace.get(), absent.get());
        transmitter.restore(backup);
        (seen.0, seen.1, (trace.get(), absent.get()))
    })
    .join()
    .expect("worker finished");

    assert_eq!(trace_seen, Some(7));
    assert_eq!(absent_seen, None, "快照之外的槽位在重放期间被清除");
    assert_eq!(restored, (Some(100), Some(200)));
}

#[test]
fn deep_copy_isolates_submitter_and_identity_shares() {
    let harness = Harness::new();
    let isolated = harness
        .slot::<Vec<String>>()
        .deep_copy(|list: &Vec<String>| list.clone())
        .build();
    let shared = harness.slot::<Arc<Mutex<Vec<String>>>>().build();
    isolated.set(vec!["root".to_owned()]);
    shared.set(Arc::new(Mutex::new(vec!["root".to_owned()])));

    let snapshot = harness.transmitter.capture();
    let transmitter = harness.transmitter.clone();
    let (isolated_worker, shared_worker) = (isolated.clone(), shared.clone());
    thread::spawn(move || {
        transmitter.run_with_captured(&snapshot, || {
            if let Some(mut list) = isolated_worker.get() {
                list.push("task".to_owned());
                isolated_worker.set(list);
            }
            if let Some(list) = shared_worker.get() {
                list.lock().push("task".to_owned());
            }
        });
    })
    .join()
    .expect("worker finished");

    assert_eq!(isolated.get(), Some(vec!["root".to_owned()]));
    let shared_now = shared.get().expect("value set");
    assert_eq!(*shared_now.lock(), vec!["root".to_owned(), "task".to_owned()]);
}

#[test]
fn ignored_null_is_absent_and_worker_rematerializes_default() {
    let harness = Harness::new();
    let tenant = harness
        .slot::<String>()
        .default_value(|| "default".to_owned())
        .build();
    tenant.set("submitter".to_owned());
    tenant.set_option(None);
    assert!(tenant.peek().is_absent(), "忽略 null 时 set(None) 等价于 remove");

    let snapshot = harness.transmitter.capture();
    assert!(!snapshot.contains(&tenant), "null 值不进入快照");

    let transmitter = harness.transmitter.clone();
    let worker = tenant.clone();
    let (inside, after) = thread::spawn(move || {
        worker.set("worker".to_owned());
        let inside = transmitter.run_with_captured(&snapshot, || worker.get());
        (inside, worker.get())
    })
    .join()
    .expect("worker finished");
    assert_eq!(inside.as_deref(), Some("default"), "工作线程重新物化默认值");
    assert_eq!(after.as_deref(), Some("worker"));
}

#[test]
fn explicit_null_is_transmitted_without_default() {
    let harness = Harness::new();
    let flag = harness
        .slot::<String>()
        .default_value(|| "default".to_owned())
        .ignore_null_on_transmit(false)
        .build();
    flag.set_option(None);
    assert_eq!(flag.get(), None, "显式 null 不触发默认值工厂");

    let snapshot = harness.transmitter.capture();
    assert_eq!(snapshot.captured(&flag), Some(SlotState::Null));

    let transmitter = harness.transmitter.clone();
    let worker = flag.clone();
    let (inside, after) = thread::spawn(move || {
        worker.set("worker".to_owned());
        let inside = transmitter.run_with_captured(&snapshot, || worker.peek());
        (inside, worker.peek())
    })
    .join()
    .expect("worker finished");
    assert_eq!(inside, SlotState::Null);
    assert_eq!(after, SlotState::Value("worker".to_owned()));
}

#[test]
fn registry_changes_after_capture() {
    let harness = Harness::new();
    let early = harness.slot::<u8>().build();
    early.set(1);
    let snapshot = harness.transmitter.capture();

    let late = harness.slot::<u8>().build();
    late.set(2);
    assert!(!snapshot.contains(&late), "捕获之后注册的槽位不在快照中");
    assert!(early.unregister());

    let transmitter = harness.transmitter.clone();
    let (early_w, late_w) = (early.clone(), late.clone());
    let observed = thread::spawn(move || {
        early_w.set(10);
        late_w.set(20);
        let inside = transmitter.run_with_captured(&snapshot, || (early_w.get(), late_w.get()));
        (inside, (early_w.get(), late_w.get()))
    })
    .join()
    .expect("worker finished");

    // 已注销的槽位不再参与重放；仍注册但不在快照中的槽位被清除后恢复。
    assert_eq!(observed.0, (Some(10), None));
    assert_eq!(observed.1, (Some(10), Some(20)));
}

#[test]
fn global_free_functions_use_the_global_registry() {
    let slot = ContextSlot::<u64>::new();
    slot.set(5);
    let snapshot = spark_transmittable::capture();
    assert_eq!(snapshot.captured(&slot), Some(SlotState::Value(5)));

    let worker = slot.clone();
    let seen = thread::spawn(move || {
        let backup = spark_transmittable::replay(&snapshot);
        let seen = worker.get();
        spark_transmittable::restore(backup);
        (seen, worker.get())
    })
    .join()
    .expect("worker finished");
    assert_eq!(seen, (Some(5), None));

    let cleared = spark_transmittable::run_with_clear(|| slot.get());
    assert_eq!(cleared, None);
    assert_eq!(slot.get(), Some(5));
    slot.discard();
}
