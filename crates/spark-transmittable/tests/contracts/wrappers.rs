//! 包装器家族契约：幂等、单次释放、捕获时机与集合门面。

mod support;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use spark_transmittable::runtime::{ExecutorService, FixedThreadPool};
use spark_transmittable::wrap::{
    is_wrapped, is_wrapped_callable, unwrap_callable, unwrap_runnables, wrap_callables,
    wrap_runnables,
};
use spark_transmittable::{
    CaptureTiming, Callable, Runnable, TransmitError, TtlCallable, TtlFnOnce, TtlRunnable,
    TtlTimerTask, WrapOptions, WrapperKind,
};
use support::{Harness, on_worker};

#[test]
fn idempotent_rewrap_returns_the_same_wrapper() {
    let harness = Harness::new();
    let options = WrapOptions::new().idempotent(true);
    let once = TtlRunnable::wrap_with(harness.transmitter.clone(), Arc::new(|| {}), options)
        .expect("plain task");
    let twice = TtlRunnable::wrap_with(harness.transmitter.clone(), Arc::clone(&once), options)
        .expect("idempotent");
    assert!(Arc::ptr_eq(&once, &twice));
    assert!(is_wrapped(&*twice));

    let err = TtlRunnable::wrap_with(harness.transmitter.clone(), once, WrapOptions::new())
        .err()
        .expect("non-idempotent rewrap fails");
    assert_eq!(
        err,
        TransmitError::AlreadyWrapped {
            kind: WrapperKind::Runnable
        }
    );
}

#[test]
fn timer_and_runnable_wrappers_recognise_each_other() {
    let harness = Harness::new();
    let runnable = TtlRunnable::wrap_with(
        harness.transmitter.clone(),
        Arc::new(|| {}),
        WrapOptions::new(),
    )
    .expect("plain task");
    let err = TtlTimerTask::wrap_with(harness.transmitter.clone(), runnable, WrapOptions::new())
        .err()
        .expect("already wrapped");
    assert!(matches!(err, TransmitError::AlreadyWrapped { .. }));
}

#[test]
fn runnable_wrapper_rejects_a_timer_wrapper() {
    let harness = Harness::new();
    let timer_task = TtlTimerTask::wrap_with(
        harness.transmitter.clone(),
        Arc::new(|| {}),
        WrapOptions::new(),
    )
    .expect("plain task");
    let err = TtlRunnable::wrap_with(
        harness.transmitter.clone(),
        Arc::clone(&timer_task),
        WrapOptions::new(),
    )
    .err()
    .expect("already wrapped");
    assert_eq!(
        err,
        TransmitError::AlreadyWrapped {
            kind: WrapperKind::Runnable
        }
    );

    let same = TtlRunnable::wrap_with(
        harness.transmitter.clone(),
        Arc::clone(&timer_task),
        WrapOptions::new().idempotent(true),
    )
    .expect("idempotent");
    assert!(Arc::ptr_eq(&same, &timer_task), "幂等包装原样返回，不嵌套");
}

fn failing_hook(_: Option<&String>) {
    panic!("execute hook failed");
}

#[test]
fn panicking_before_hook_leaves_the_pooled_worker_clean() {
    let harness = Harness::new();
    let tenant = harness.slot::<String>().before_execute(failing_hook).build();
    tenant.set("submitter".to_owned());
    let pool = FixedThreadPool::new(1).expect("spawn worker");

    let reader = tenant.clone();
    let wrapped = TtlCallable::wrap_with(
        harness.transmitter.clone(),
        Arc::new(move || reader.get()),
        WrapOptions::new(),
    )
    .expect("plain task");
    let seen = pool
        .submit(wrapped)
        .expect("pool accepts tasks")
        .join()
        .expect("hook failure does not fail the task");
    assert_eq!(seen.as_deref(), Some("submitter"));

    let worker = tenant.clone();
    assert_eq!(on_worker(&pool, move || worker.get()), None, "工作线程交还时不残留任务上下文");
}

#[test]
fn panicking_after_hook_still_restores_the_worker() {
    let harness = Harness::new();
    let tenant = harness.slot::<String>().after_execute(failing_hook).build();
    tenant.set("submitter".to_owned());
    let snapshot = harness.transmitter.capture();

    let transmitter = harness.transmitter.clone();
    let worker = tenant.clone();
    let (inside, after) = thread::spawn(move || {
        worker.set("worker".to_owned());
        let inside = transmitter.run_with_captured(&snapshot, || worker.get());
        (inside, worker.get())
    })
    .join()
    .expect("hook failure is contained");
    assert_eq!(inside.as_deref(), Some("submitter"));
    assert_eq!(after.as_deref(), Some("worker"));
}

#[test]
fn release_after_run_allows_exactly_one_call() {
    let harness = Harness::new();
    let slot = harness.slot::<u32>().build();
    slot.set(3);
    let reader = slot.clone();
    let wrapped = TtlCallable::wrap_with(
        harness.transmitter.clone(),
        Arc::new(move || reader.get().unwrap_or_default() * 2),
        WrapOptions::new().release_after_run(true),
    )
    .expect("plain task");
    let wrapper = TtlCallable::downcast(&*wrapped).expect("is a wrapper");

    assert!(!wrapper.is_released());
    assert_eq!(wrapper.try_call(), Ok(6));
    assert!(wrapper.is_released());
    assert_eq!(
        wrapper.try_call(),
        Err(TransmitError::ReferenceReleased {
            kind: WrapperKind::Callable
        })
    );

    // 通过 trait 调用时违反契约以 panic 暴露，消息指明违反的契约。
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| wrapped.call()));
    let payload = outcome.expect_err("second call panics");
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.contains("released"), "unexpected panic message: {message}");
}

#[test]
fn task_panic_propagates_after_restore() {
    let harness = Harness::new();
    let slot = harness.slot::<&'static str>().build();
    slot.set("submitter");
    fn explode() {
        panic!("body failed");
    }
    let wrapped = TtlRunnable::wrap_with(
        harness.transmitter.clone(),
        Arc::new(explode),
        WrapOptions::new(),
    )
    .expect("plain task");

    let worker = slot.clone();
    let after = thread::spawn(move || {
        worker.set("worker");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| wrapped.run()));
        (outcome.is_err(), worker.get())
    })
    .join()
    .expect("worker finished");
    assert_eq!(after, (true, Some("worker")));
}

#[test]
fn capture_at_run_freezes_the_invokers_values() {
    let harness = Harness::new();
    let slot = harness
        .slot::<String>()
        .shadow_copy(|value: &String| value.clone())
        .build();
    slot.set("submitter".to_owned());

    let reader = slot.clone();
    let wrapped = TtlCallable::wrap_with(
        harness.transmitter.clone(),
        Arc::new(move || {
            let seen = reader.get();
            reader.set("task".to_owned());
            seen
        }),
        WrapOptions::new().capture_timing(CaptureTiming::AtRun),
    )
    .expect("plain task");
    assert!(TtlCallable::downcast(&*wrapped).and_then(TtlCallable::snapshot).is_none());

    let invoker = slot.clone();
    let (seen, after) = thread::spawn(move || {
        invoker.set("invoker".to_owned());
        let seen = wrapped.call();
        (seen, invoker.get())
    })
    .join()
    .expect("invoker finished");
    assert_eq!(seen.as_deref(), Some("invoker"));
    assert_eq!(after.as_deref(), Some("invoker"), "任务内写入不回流到调用方");
}

#[test]
fn collection_facades_preserve_positions() {
    let first: Arc<dyn Runnable> = Arc::new(|| {});
    let second: Arc<dyn Runnable> = Arc::new(|| {});
    let wrapped = wrap_runnables(
        vec![Some(Arc::clone(&first)), None, Some(Arc::clone(&second))],
        WrapOptions::new(),
    )
    .expect("plain tasks");
    assert_eq!(wrapped.len(), 3);
    assert!(wrapped[1].is_none());
    assert!(wrapped.iter().flatten().all(|task| is_wrapped(&**task)));

    let unwrapped = unwrap_runnables(wrapped);
    assert!(Arc::ptr_eq(unwrapped[0].as_ref().expect("kept"), &first));
    assert!(unwrapped[1].is_none());
    assert!(Arc::ptr_eq(unwrapped[2].as_ref().expect("kept"), &second));

    let callable: Arc<dyn Callable<Output = u8>> = Arc::new(|| 1);
    let wrapped = wrap_callables(vec![None, Some(Arc::clone(&callable))], WrapOptions::new())
        .expect("plain tasks");
    let inner = wrapped[1].clone().expect("kept");
    assert!(is_wrapped_callable(&*inner));
    assert!(Arc::ptr_eq(&unwrap_callable(inner), &callable));
}

#[test]
fn fn_once_wrapper_moves_its_closure() {
    let harness = Harness::new();
    let slot = harness.slot::<u64>().build();
    slot.set(9);
    let payload = vec![1_u64, 2, 3];
    let reader = slot.clone();
    let wrapped = TtlFnOnce::with_transmitter(harness.transmitter.clone(), move || {
        payload.into_iter().sum::<u64>() + reader.get().unwrap_or_default()
    });
    assert_eq!(wrapped.snapshot().len(), 1);
    let total = thread::spawn(move || wrapped.call())
        .join()
        .expect("worker finished");
    assert_eq!(total, 15);
}
