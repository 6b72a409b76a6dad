//! 任务结果、完成句柄与周期调度句柄。
//!
//! # 设计背景（Why）
//! - 执行器需要一个统一的方式把任务结果交还给提交方：沿用 `JoinHandle` 的命名与语义
//!   （`join`/`cancel`/`is_finished`/`is_cancelled`），但以阻塞方式等待，因为传递协议只覆盖同步任务体；
//! - `TaskError` 区分取消、panic、执行器关闭与一般失败，调用方据此决定补偿策略。
//!
//! # 契约说明（What）
//! - `cancel` 只对尚未开始的任务生效，语义为协作式“请求取消”；
//! - `join` 消费句柄并阻塞到任务结束；任务 panic 时返回 [`TaskError::Panicked`]，携带 panic 信息。

use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// 任务执行结果。
pub type TaskResult<T = ()> = Result<T, TaskError>;

/// 任务失败原因。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(Cow<'static, str>),
    #[error("executor terminated")]
    ExecutorTerminated,
    #[error("task failed: {0}")]
    Failed(Cow<'static, str>),
}

impl TaskError {
    /// 从 panic 载荷提取可读信息。
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        TaskError::Panicked(panic_message(payload))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Cow<'static, str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Cow::Owned(message.clone())
    } else {
        Cow::Borrowed("opaque panic payload")
    }
}

enum CompletionState<T> {
    Pending,
    Running,
    Done(TaskResult<T>),
    Taken,
}

/// 提交方与执行线程之间的一次性结果交接点。
pub(crate) struct Completion<T> {
    state: Mutex<CompletionState<T>>,
    finished: Condvar,
    cancelled: AtomicBool,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CompletionState::Pending),
            finished: Condvar::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    /// 在执行线程上运行 `body` 并记录结果；已取消或已开始时不执行。
    pub(crate) fn run(&self, body: impl FnOnce() -> T) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, CompletionState::Pending) {
                return;
            }
            *state = CompletionState::Running;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(body))
            .map_err(|payload| TaskError::from_panic(&*payload));
        self.finish(outcome);
    }

    fn finish(&self, outcome: TaskResult<T>) {
        let mut state = self.state.lock();
        *state = CompletionState::Done(outcome);
        self.finished.notify_all();
    }

    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, CompletionState::Pending) {
            return false;
        }
        *state = CompletionState::Done(Err(TaskError::Cancelled));
        self.cancelled.store(true, Ordering::Release);
        self.finished.notify_all();
        true
    }

    fn is_finished(&self) -> bool {
        matches!(
            *self.state.lock(),
            CompletionState::Done(_) | CompletionState::Taken
        )
    }

    fn wait(&self) -> TaskResult<T> {
        let mut state = self.state.lock();
        loop {
            match core::mem::replace(&mut *state, CompletionState::Taken) {
                CompletionState::Done(outcome) => return outcome,
                CompletionState::Taken => {
                    return Err(TaskError::Failed(Cow::Borrowed("task result already taken")));
                }
                pending @ (CompletionState::Pending | CompletionState::Running) => {
                    *state = pending;
                    self.finished.wait(&mut state);
                }
            }
        }
    }
}

/// 任务完成句柄。
///
/// # 契约说明（What）
/// - 只能由执行器构造；
/// - `join` 消费句柄，阻塞到任务结束；
/// - 句柄被丢弃不会取消任务。
pub struct JoinHandle<T> {
    completion: Arc<Completion<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(completion: Arc<Completion<T>>) -> Self {
        Self { completion }
    }

    /// 请求取消；仅当任务尚未开始时生效并返回 `true`。
    pub fn cancel(&self) -> bool {
        self.completion.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.completion.cancelled.load(Ordering::Acquire)
    }

    /// 阻塞等待任务结束并返回结果。
    pub fn join(self) -> TaskResult<T> {
        self.completion.wait()
    }
}

impl<T> core::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScheduleState {
    cancelled: AtomicBool,
    runs: AtomicU64,
    done: AtomicBool,
}

impl ScheduleState {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// 定时调度句柄。
#[derive(Clone, Debug)]
pub struct ScheduledHandle {
    state: Arc<ScheduleState>,
}

impl ScheduledHandle {
    pub(crate) fn new(state: Arc<ScheduleState>) -> Self {
        Self { state }
    }

    /// 取消后续触发；正在执行的那一次不受影响。返回是否由本次调用完成取消。
    pub fn cancel(&self) -> bool {
        !self.state.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// 已完成的触发次数。
    pub fn run_count(&self) -> u64 {
        self.state.runs.load(Ordering::Acquire)
    }

    /// 一次性任务已执行，或周期任务因取消/panic 不再触发。
    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }
}
