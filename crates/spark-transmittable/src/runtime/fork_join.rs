//! 分治任务池。
//!
//! # 设计背景（Why）
//! - 分治任务在计算过程中不断派生子任务；父任务可能在派生左子任务与右子任务之间修改上下文，
//!   因此每个子任务必须在“派生时刻”独立捕获自己的快照，而不是共享父任务的快照；
//! - 父任务 `join` 子任务时若子任务尚未被工作线程取走，则由 `join` 所在线程直接执行，避免全部工作线程都在等待而饿死。
//!
//! # 逻辑解析（How）
//! - [`ForkScope::fork`] 捕获快照、创建带状态机（`Pending → Running → Done`）的子任务并入队；
//! - 子任务无论由工作线程还是由 `join` 方执行，都在 `run_with_captured` 中运行：先重放自己的快照，
//!   `compute` 返回（或 panic）后恢复到执行线程的原状态；
//! - 子任务的 panic 被捕获并在 `join` 方以 `resume_unwind` 重新抛出。
//!
//! # 契约说明（What）
//! - 子任务只会被执行一次：状态从 `Pending` 到 `Running` 的迁移在锁内完成；
//! - 外部线程调用 `join` 时只等待，不抢占执行，除非子任务从未成功入队。

use core::any::Any;
use core::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::executor::{Executor, ExecutorService};
use super::pool::FixedThreadPool;
use super::task::TaskError;
use crate::config::PoolSettings;
use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;
use crate::wrap::Runnable;

/// 可递归拆分的计算。
pub trait RecursiveTask: Send + Sync + 'static {
    type Output: Send + 'static;

    /// 计算结果；可通过 `scope` 派生子任务。
    fn compute(&self, scope: &ForkScope) -> Self::Output;
}

struct ForkJoinShared {
    workers: FixedThreadPool,
    transmitter: Transmitter,
}

/// 分治任务池。
pub struct ForkJoinPool {
    shared: Arc<ForkJoinShared>,
}

impl ForkJoinPool {
    pub fn new(parallelism: usize) -> io::Result<Self> {
        Self::with_settings(
            &PoolSettings {
                workers: parallelism,
                thread_name_prefix: "spark-fork-join".to_owned(),
            },
            Transmitter::global(),
        )
    }

    pub fn with_settings(settings: &PoolSettings, transmitter: Transmitter) -> io::Result<Self> {
        Ok(Self {
            shared: Arc::new(ForkJoinShared {
                workers: FixedThreadPool::with_settings(settings)?,
                transmitter,
            }),
        })
    }

    /// 在调用方线程捕获上下文，提交根任务并等待结果。
    pub fn invoke<T: RecursiveTask>(&self, task: T) -> T::Output {
        self.scope().fork(task).join()
    }

    /// 提交根任务，返回可稍后 `join` 的句柄。
    pub fn submit<T: RecursiveTask>(&self, task: T) -> Result<Forked<T::Output>, TaskError> {
        let scope = self.scope();
        let job = scope.job(task);
        self.shared.workers.execute(job.clone())?;
        Ok(Forked { job })
    }

    pub fn parallelism(&self) -> usize {
        self.shared.workers.worker_count()
    }

    pub fn shutdown(&self) {
        self.shared.workers.shutdown();
    }

    fn scope(&self) -> ForkScope {
        ForkScope {
            shared: Arc::clone(&self.shared),
        }
    }
}

// 队列中残留的子任务持有共享状态；关闭后工作线程取空队列即退出，引用随之释放。
impl Drop for ForkJoinPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ForkJoinPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkJoinPool")
            .field("workers", &self.shared.workers)
            .finish()
    }
}

/// 子任务派生作用域。
pub struct ForkScope {
    shared: Arc<ForkJoinShared>,
}

impl ForkScope {
    /// 在当前线程捕获上下文并派生子任务。
    pub fn fork<T: RecursiveTask>(&self, task: T) -> Forked<T::Output> {
        let job = self.job(task);
        if let Err(error) = self.shared.workers.execute(job.clone()) {
            tracing::debug!(%error, "fork queue rejected subtask, it will run on join");
            job.orphaned();
        }
        Forked { job }
    }

    /// 当前线程是否为池的工作线程。
    pub fn in_worker(&self) -> bool {
        self.shared.workers.is_current_worker()
    }

    fn job<T: RecursiveTask>(&self, task: T) -> Arc<ForkJob<T>> {
        Arc::new(ForkJob {
            task,
            snapshot: self.shared.transmitter.capture(),
            shared: Arc::clone(&self.shared),
            state: Mutex::new(JobState::Pending),
            finished: Condvar::new(),
        })
    }
}

enum JobState<R> {
    Pending,
    /// 入队失败，只能由 `join` 方执行。
    Orphaned,
    Running,
    Done(Result<R, Box<dyn Any + Send>>),
    Joined,
}

/// 携带派生时快照的子任务。
struct ForkJob<T: RecursiveTask> {
    task: T,
    snapshot: Snapshot,
    shared: Arc<ForkJoinShared>,
    state: Mutex<JobState<T::Output>>,
    finished: Condvar,
}

impl<T: RecursiveTask> ForkJob<T> {
    fn orphaned(&self) {
        let mut state = self.state.lock();
        if matches!(*state, JobState::Pending) {
            *state = JobState::Orphaned;
        }
    }

    /// 抢占执行权；成功时由调用方负责执行。
    fn claim(&self, joiner_may_run: bool) -> bool {
        let mut state = self.state.lock();
        let claimable = match *state {
            JobState::Pending => joiner_may_run,
            JobState::Orphaned => true,
            _ => false,
        };
        if claimable {
            *state = JobState::Running;
        }
        claimable
    }

    fn execute(&self) {
        let scope = ForkScope {
            shared: Arc::clone(&self.shared),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.shared
                .transmitter
                .run_with_captured(&self.snapshot, || self.task.compute(&scope))
        }));
        let mut state = self.state.lock();
        *state = JobState::Done(outcome);
        self.finished.notify_all();
    }

    fn wait(&self) -> Result<T::Output, Box<dyn Any + Send>> {
        let mut state = self.state.lock();
        loop {
            match core::mem::replace(&mut *state, JobState::Joined) {
                JobState::Done(outcome) => return outcome,
                JobState::Joined => {
                    return Err(Box::new("fork/join subtask joined twice"));
                }
                other => {
                    *state = other;
                    self.finished.wait(&mut state);
                }
            }
        }
    }
}

impl<T: RecursiveTask> Runnable for ForkJob<T> {
    fn run(&self) {
        if self.claim(true) {
            self.execute();
        }
    }
}

/// 已派生子任务的句柄。
pub struct Forked<R> {
    job: Arc<dyn JoinTarget<R>>,
}

trait JoinTarget<R>: Send + Sync {
    fn join_inline(&self) -> Result<R, Box<dyn Any + Send>>;

    fn is_done(&self) -> bool;
}

impl<T: RecursiveTask> JoinTarget<T::Output> for ForkJob<T> {
    fn join_inline(&self) -> Result<T::Output, Box<dyn Any + Send>> {
        let joiner_is_worker = self.shared.workers.is_current_worker();
        if self.claim(joiner_is_worker) {
            self.execute();
        }
        self.wait()
    }

    fn is_done(&self) -> bool {
        matches!(*self.state.lock(), JobState::Done(_) | JobState::Joined)
    }
}

impl<R> Forked<R> {
    /// 等待子任务完成并返回结果；子任务 panic 时在此处重新抛出。
    pub fn join(self) -> R {
        match self.job.join_inline() {
            Ok(output) => output,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn is_done(&self) -> bool {
        self.job.is_done()
    }
}

impl<R> fmt::Debug for Forked<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forked")
            .field("done", &self.is_done())
            .finish()
    }
}
