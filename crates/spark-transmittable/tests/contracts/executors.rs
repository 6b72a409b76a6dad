//! 执行器装饰器契约：提交、调度与委托。

mod support;

use std::sync::{Arc, mpsc};
use std::time::Duration;

use parking_lot::Mutex;
use spark_transmittable::runtime::{
    Executor, ExecutorService, FixedThreadPool, ScheduledExecutor, TaskError, Timer, TtlExecutor,
};
use spark_transmittable::{Callable, Runnable, WrapOptions};
use support::{Harness, on_worker};

fn decorated<E>(harness: &Harness, inner: E) -> TtlExecutor<E> {
    TtlExecutor::with_options(inner, harness.transmitter.clone(), WrapOptions::new())
}

/// 每次提交都在提交时刻捕获，前后两次提交互不影响。
#[test]
fn each_submission_captures_at_submit_time() {
    let harness = Harness::new();
    let request = harness.slot::<u32>().build();
    let executor = decorated(&harness, FixedThreadPool::new(2).expect("spawn workers"));

    let mut handles = Vec::new();
    for id in 1..=4 {
        request.set(id);
        let reader = request.clone();
        handles.push(
            executor
                .submit(Arc::new(move || reader.get()))
                .expect("pool accepts tasks"),
        );
    }
    let seen: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("task completes"))
        .collect();
    assert_eq!(seen, vec![Some(1), Some(2), Some(3), Some(4)]);
}

#[test]
fn worker_state_survives_decorated_tasks() {
    let harness = Harness::new();
    let ctx = harness.slot::<&'static str>().build();
    let executor = decorated(&harness, FixedThreadPool::new(1).expect("spawn worker"));

    let worker = ctx.clone();
    on_worker(executor.inner(), move || worker.set("worker-own"));

    ctx.set("submitter");
    let reader = ctx.clone();
    let inside = executor
        .submit(Arc::new(move || {
            let seen = reader.get();
            reader.set("overwritten");
            seen
        }))
        .expect("pool accepts tasks")
        .join();
    assert_eq!(inside, Ok(Some("submitter")));

    let worker = ctx.clone();
    assert_eq!(on_worker(executor.inner(), move || worker.get()), Some("worker-own"));
}

#[test]
fn invoke_any_returns_first_success() {
    let harness = Harness::new();
    let executor = decorated(&harness, FixedThreadPool::new(2).expect("spawn workers"));
    fn fail() -> u8 {
        panic!("first candidate fails");
    }
    let tasks: Vec<Arc<dyn Callable<Output = u8>>> = vec![Arc::new(fail), Arc::new(|| 42)];
    assert_eq!(executor.invoke_any(tasks), Ok(42));

    let failing: Vec<Arc<dyn Callable<Output = u8>>> = vec![Arc::new(fail)];
    assert!(matches!(
        executor.invoke_any(failing),
        Err(TaskError::Panicked(_))
    ));
}

#[test]
fn scheduled_tasks_carry_context_across_firings() {
    let harness = Harness::new();
    let tenant = harness.slot::<String>().build();
    let timer = decorated(&harness, Timer::new().expect("spawn timer"));

    tenant.set("tenant-a".to_owned());
    let (tx, rx) = mpsc::channel();
    let reader = tenant.clone();
    let handle = timer
        .schedule_at_fixed_rate(
            Arc::new(move || {
                let seen = reader.get();
                reader.set("mutated".to_owned());
                let _ = tx.send(seen);
            }),
            Duration::ZERO,
            Duration::from_millis(2),
        )
        .expect("timer accepts tasks");
    tenant.set("tenant-b".to_owned());

    for _ in 0..3 {
        let seen = rx.recv().expect("fired");
        assert_eq!(seen.as_deref(), Some("tenant-a"), "每次触发都从同一份快照出发");
    }
    assert!(handle.cancel());

    let (tx, rx) = mpsc::channel();
    let reader = tenant.clone();
    timer
        .schedule(
            Arc::new(move || {
                let _ = tx.send(reader.get());
            }),
            Duration::from_millis(1),
        )
        .expect("timer accepts tasks");
    assert_eq!(rx.recv().expect("fired").as_deref(), Some("tenant-b"));
}

#[test]
fn release_after_run_option_does_not_break_fixed_rate() {
    let harness = Harness::new();
    let timer = TtlExecutor::with_options(
        Timer::new().expect("spawn timer"),
        harness.transmitter.clone(),
        WrapOptions::new().release_after_run(true),
    );
    let (tx, rx) = mpsc::channel();
    let handle = timer
        .schedule_at_fixed_rate(
            Arc::new(move || {
                let _ = tx.send(());
            }),
            Duration::ZERO,
            Duration::from_millis(2),
        )
        .expect("periodic wrapper ignores release");
    rx.recv().expect("first firing");
    rx.recv().expect("second firing");
    assert!(handle.cancel());

    // 一次性调度仍然遵守单次释放。
    let (tx, rx) = mpsc::channel();
    timer
        .schedule(
            Arc::new(move || {
                let _ = tx.send(());
            }),
            Duration::ZERO,
        )
        .expect("timer accepts tasks");
    rx.recv().expect("one-shot fired");
}

#[test]
fn execute_after_shutdown_is_rejected() {
    let harness = Harness::new();
    let executor = decorated(&harness, FixedThreadPool::new(1).expect("spawn worker"));
    executor.shutdown();
    assert_eq!(
        executor.execute(Arc::new(|| {})),
        Err(TaskError::ExecutorTerminated)
    );
    assert!(executor.into_inner().is_shutdown());
}

/// 谓词对未包装的候选只判定一次；对包装器先判定原始任务，未命中时才判定包装器本身。
#[test]
fn remove_if_consults_the_predicate_once_per_plain_candidate() {
    let harness = Harness::new();
    let executor = decorated(&harness, FixedThreadPool::new(1).expect("spawn worker"));
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    executor
        .inner()
        .execute(Arc::new(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.lock().recv();
        }))
        .expect("pool accepts tasks");
    started_rx.recv().expect("blocker running");

    let plain: Arc<dyn Runnable> = Arc::new(|| {});
    executor
        .inner()
        .execute(Arc::clone(&plain))
        .expect("pool accepts tasks");
    let submitted: Arc<dyn Runnable> = Arc::new(|| {});
    executor
        .execute(Arc::clone(&submitted))
        .expect("pool accepts tasks");

    let mut calls = 0;
    assert_eq!(
        executor.remove_if(&mut |_| {
            calls += 1;
            false
        }),
        0
    );
    assert_eq!(calls, 3, "未包装候选 1 次，包装器候选 2 次");

    let mut calls = 0;
    assert_eq!(
        executor.remove_if(&mut |candidate| {
            calls += 1;
            Arc::ptr_eq(candidate, &submitted)
        }),
        1
    );
    assert_eq!(calls, 2, "包装器以原始任务命中，不再判定包装器本身");
    gate_tx.send(()).expect("blocker alive");
}
