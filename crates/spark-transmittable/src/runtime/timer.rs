//! 单线程定时器。
//!
//! # 逻辑解析（How）
//! - 待触发条目按截止时间放在最小堆中，同一截止时间按入队序号先进先出；
//! - 后台线程在 `Condvar` 上等待到最早的截止时间；触发时释放锁再执行任务；
//! - 周期条目在执行结束后按“上次截止时间 + 周期”重新入堆（固定频率），落后时不补跑；
//! - 周期任务 panic 后不再触发，句柄标记为完成。
//!
//! # 契约说明（What）
//! - 所有回调都在同一个后台线程上串行执行：同一个包装器会被重复调用，上下文由包装器在每次触发前后重放与恢复；
//! - 关闭后尚未到期的条目被丢弃。

use core::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::executor::{Executor, ScheduledExecutor};
use super::task::{ScheduleState, ScheduledHandle, TaskError, panic_message};
use crate::config::TimerSettings;
use crate::wrap::Runnable;

struct Entry {
    deadline: Instant,
    sequence: u64,
    period: Option<Duration>,
    task: Arc<dyn Runnable>,
    state: Arc<ScheduleState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // 反转比较，使 `BinaryHeap` 成为按截止时间的最小堆。
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct TimerQueue {
    entries: BinaryHeap<Entry>,
    next_sequence: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
    name: String,
}

impl TimerShared {
    fn push(
        &self,
        task: Arc<dyn Runnable>,
        delay: Duration,
        period: Option<Duration>,
    ) -> Result<ScheduledHandle, TaskError> {
        let state = Arc::new(ScheduleState::default());
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return Err(TaskError::ExecutorTerminated);
        }
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.entries.push(Entry {
            deadline: Instant::now() + delay,
            sequence,
            period,
            task,
            state: Arc::clone(&state),
        });
        drop(queue);
        self.wakeup.notify_one();
        Ok(ScheduledHandle::new(state))
    }

    /// 阻塞直到有条目到期；关闭时返回 `None`。
    fn next_due(&self) -> Option<Entry> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            let now = Instant::now();
            let head = queue
                .entries
                .peek()
                .map(|entry| (entry.deadline, entry.state.is_cancelled()));
            match head {
                None => self.wakeup.wait(&mut queue),
                Some((_, true)) => {
                    if let Some(entry) = queue.entries.pop() {
                        entry.state.mark_done();
                    }
                }
                Some((deadline, false)) if deadline <= now => return queue.entries.pop(),
                Some((deadline, false)) => {
                    self.wakeup.wait_until(&mut queue, deadline);
                }
            }
        }
    }

    fn reschedule(&self, mut entry: Entry, period: Duration) {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            entry.state.mark_done();
            return;
        }
        let now = Instant::now();
        entry.deadline += period;
        if entry.deadline < now {
            entry.deadline = now;
        }
        entry.sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.entries.push(entry);
    }
}

/// 单后台线程的延迟/周期调度器。
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer {
    pub fn new() -> io::Result<Self> {
        Self::with_settings(&TimerSettings::default())
    }

    pub fn with_settings(settings: &TimerSettings) -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue {
                entries: BinaryHeap::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            name: settings.thread_name.clone(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(settings.thread_name.clone())
                .spawn(move || timer_loop(shared))?
        };
        tracing::debug!(timer = %shared.name, "timer started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(worker)),
        })
    }

    /// 尚未触发（含周期任务的下一次）的条目数量。
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// 停止调度并等待后台线程退出；未到期条目被丢弃。
    pub fn shutdown(&self) {
        let discarded: Vec<Entry> = {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            queue.entries.drain().collect()
        };
        for entry in &discarded {
            entry.state.mark_done();
        }
        self.shared.wakeup.notify_all();
        let Some(worker) = self.thread.lock().take() else {
            return;
        };
        if worker.thread().id() != thread::current().id() && worker.join().is_err() {
            tracing::error!(timer = %self.shared.name, "timer thread terminated abnormally");
        }
        tracing::debug!(timer = %self.shared.name, discarded = discarded.len(), "timer stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }
}

fn timer_loop(shared: Arc<TimerShared>) {
    while let Some(entry) = shared.next_due() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.task.run()));
        entry.state.record_run();
        match (outcome, entry.period) {
            (Ok(()), Some(period)) if !entry.state.is_cancelled() => {
                shared.reschedule(entry, period);
            }
            (Ok(()), _) => entry.state.mark_done(),
            (Err(payload), _) => {
                tracing::warn!(
                    timer = %shared.name,
                    panic = %panic_message(&*payload),
                    "scheduled task panicked, further runs suppressed"
                );
                entry.state.mark_done();
            }
        }
    }
}

impl Executor for Timer {
    /// 立即触发一次。
    fn execute(&self, task: Arc<dyn Runnable>) -> Result<(), TaskError> {
        self.shared.push(task, Duration::ZERO, None).map(drop)
    }

    fn remove_if(&self, predicate: &mut dyn FnMut(&Arc<dyn Runnable>) -> bool) -> usize {
        let removed: Vec<Entry> = {
            let mut queue = self.shared.queue.lock();
            let (removed, kept): (Vec<Entry>, Vec<Entry>) =
                queue.entries.drain().partition(|entry| predicate(&entry.task));
            queue.entries = kept.into();
            removed
        };
        for entry in &removed {
            entry.state.mark_done();
        }
        removed.len()
    }
}

impl ScheduledExecutor for Timer {
    fn schedule(
        &self,
        task: Arc<dyn Runnable>,
        delay: Duration,
    ) -> Result<ScheduledHandle, TaskError> {
        self.shared.push(task, delay, None)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn Runnable>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, TaskError> {
        if period.is_zero() {
            return Err(TaskError::Failed("fixed-rate period must be positive".into()));
        }
        self.shared.push(task, initial_delay, Some(period))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .finish()
    }
}
