//! 固定大小线程池。
//!
//! # 设计背景（Why）
//! - 传递协议的价值在于“工作线程被复用”：线程池中的线程早在任务提交之前就已存在，线程创建时继承不会触发；
//! - 该池是协议的最小真实载体：固定数量的工作线程从共享队列取任务执行。
//!
//! # 逻辑解析（How）
//! - 队列为 `parking_lot::Mutex<VecDeque<_>>`，配合 `Condvar` 唤醒空闲线程；
//! - 任务在 `catch_unwind` 中执行：panic 被记录为 `warn!`，工作线程继续服务后续任务；
//! - `shutdown` 后拒绝新任务，已入队的任务全部执行完毕后线程退出；`Drop` 时关闭并等待线程结束。
//!
//! # 风险提示（Trade-offs）
//! - 单一共享队列在高并发下存在锁竞争；对于验证上下文传递的场景足够，且行为可预测。

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use core::cell::Cell;

use parking_lot::{Condvar, Mutex};

use super::executor::{Executor, ExecutorService};
use super::task::{TaskError, panic_message};
use crate::config::PoolSettings;
use crate::wrap::Runnable;

thread_local! {
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

struct PoolQueue {
    tasks: VecDeque<Arc<dyn Runnable>>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
    name: String,
}

impl PoolShared {
    fn identity(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn next_task(&self) -> Option<Arc<dyn Runnable>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if queue.shutdown {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }
}

/// 固定数量工作线程的执行器。
pub struct FixedThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FixedThreadPool {
    /// 以默认线程名前缀创建 `workers` 个工作线程。
    pub fn new(workers: usize) -> io::Result<Self> {
        Self::with_settings(&PoolSettings {
            workers,
            ..PoolSettings::default()
        })
    }

    pub fn with_settings(settings: &PoolSettings) -> io::Result<Self> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            name: settings.thread_name_prefix.clone(),
        });
        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(settings.workers)),
        };
        for index in 0..settings.workers.max(1) {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", settings.thread_name_prefix))
                .spawn(move || worker_loop(shared))?;
            pool.workers.lock().push(handle);
        }
        tracing::debug!(
            pool = %pool.shared.name,
            workers = settings.workers.max(1),
            "thread pool started"
        );
        Ok(pool)
    }

    /// 当前线程是否为本池的工作线程。
    pub fn is_current_worker(&self) -> bool {
        let identity = self.shared.identity();
        CURRENT_POOL.with(|current| current.get() == identity)
    }

    /// 等待执行的任务数量。
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// 关闭并等待全部工作线程退出。
    pub fn shutdown_and_join(&self) {
        self.shutdown();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if self.is_current_worker() {
            // 工作线程无法等待自身退出，交由各线程自行结束。
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!(pool = %self.shared.name, "pool worker terminated abnormally");
            }
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    CURRENT_POOL.with(|current| current.set(shared.identity()));
    while let Some(task) = shared.next_task() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            tracing::warn!(
                pool = %shared.name,
                panic = %panic_message(&*payload),
                "task panicked, worker continues"
            );
        }
    }
    tracing::debug!(pool = %shared.name, "pool worker exiting");
}

impl Executor for FixedThreadPool {
    fn execute(&self, task: Arc<dyn Runnable>) -> Result<(), TaskError> {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(TaskError::ExecutorTerminated);
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    fn remove_if(&self, predicate: &mut dyn FnMut(&Arc<dyn Runnable>) -> bool) -> usize {
        let removed: Vec<Arc<dyn Runnable>> = {
            let mut queue = self.shared.queue.lock();
            let before = queue.tasks.len();
            let mut kept = VecDeque::with_capacity(before);
            let mut removed = Vec::new();
            for task in queue.tasks.drain(..) {
                if predicate(&task) {
                    removed.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            queue.tasks = kept;
            removed
        };
        removed.len()
    }
}

impl ExecutorService for FixedThreadPool {
    fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if !queue.shutdown {
            queue.shutdown = true;
            tracing::debug!(
                pool = %self.shared.name,
                pending = queue.tasks.len(),
                "thread pool shutting down"
            );
        }
        drop(queue);
        self.shared.available.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }
}

impl Drop for FixedThreadPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

impl core::fmt::Debug for FixedThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedThreadPool")
            .field("name", &self.shared.name)
            .field("workers", &self.worker_count())
            .field("queued", &self.queued())
            .finish()
    }
}
