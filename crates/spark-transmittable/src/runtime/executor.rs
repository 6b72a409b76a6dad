//! 执行器契约。
//!
//! # 设计背景（Why）
//! - 传递协议要求“包装器能插在任意执行器前面”，因此执行器以 trait 描述，委托包装器只依赖这些契约；
//! - 延续对象安全接口 + `Self: Sized` 泛型默认方法的组合：`execute`/`remove_if` 可经 `dyn` 调用，
//!   `submit`/`invoke_all`/`invoke_any` 以默认实现复用 `execute`，具体执行器也可按需覆写。
//!
//! # 契约说明（What）
//! - 所有方法都在调用方线程同步返回；任务体在执行器的工作线程上运行；
//! - 执行器关闭后提交返回 [`TaskError::ExecutorTerminated`]；
//! - `remove_if` 只移除尚未开始的任务，返回移除数量。

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use super::task::{Completion, JoinHandle, ScheduledHandle, TaskError, TaskResult};
use crate::wrap::{Callable, Runnable};

/// 接收无返回值任务的执行器。
pub trait Executor: Send + Sync + 'static {
    /// 提交任务；执行器已关闭时返回错误。
    fn execute(&self, task: Arc<dyn Runnable>) -> Result<(), TaskError>;

    /// 移除所有满足谓词、尚未开始的任务。
    fn remove_if(&self, predicate: &mut dyn FnMut(&Arc<dyn Runnable>) -> bool) -> usize;

    /// 按指针身份移除一个尚未开始的任务。
    fn remove(&self, task: &Arc<dyn Runnable>) -> bool {
        self.remove_if(&mut |queued| Arc::ptr_eq(queued, task)) > 0
    }
}

/// 带生命周期管理与结果回传的执行器。
pub trait ExecutorService: Executor {
    /// 停止接收新任务；已入队的任务仍会执行。
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// 提交有返回值任务。
    fn submit<T>(&self, task: Arc<dyn Callable<Output = T>>) -> Result<JoinHandle<T>, TaskError>
    where
        Self: Sized,
        T: Send + 'static,
    {
        let completion = Completion::new();
        let runner = {
            let completion = Arc::clone(&completion);
            move || completion.run(|| task.call())
        };
        self.execute(Arc::new(runner))?;
        Ok(JoinHandle::new(completion))
    }

    /// 提交全部任务并等待全部结束，结果按提交顺序排列。
    fn invoke_all<T>(
        &self,
        tasks: Vec<Arc<dyn Callable<Output = T>>>,
    ) -> Result<Vec<TaskResult<T>>, TaskError>
    where
        Self: Sized,
        T: Send + 'static,
    {
        let handles = tasks
            .into_iter()
            .map(|task| self.submit(task))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(handles.into_iter().map(JoinHandle::join).collect())
    }

    /// 返回第一个成功完成的结果并取消其余未开始的任务；全部失败时返回最后一个错误。
    fn invoke_any<T>(&self, tasks: Vec<Arc<dyn Callable<Output = T>>>) -> TaskResult<T>
    where
        Self: Sized,
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<TaskResult<T>>();
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let sender = sender.clone();
            let relay: Arc<dyn Callable<Output = ()>> = Arc::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.call()))
                    .map_err(|payload| TaskError::from_panic(&*payload));
                let _ = sender.send(outcome);
            });
            handles.push(self.submit(relay)?);
        }
        drop(sender);

        let mut last = Err(TaskError::Failed("no task submitted".into()));
        for _ in 0..handles.len() {
            match receiver.recv() {
                Ok(Ok(value)) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => last = Err(error),
                Err(_) => break,
            }
        }
        last
    }
}

/// 支持延迟与周期调度的执行器。
pub trait ScheduledExecutor: Executor {
    /// 延迟 `delay` 后执行一次。
    fn schedule(
        &self,
        task: Arc<dyn Runnable>,
        delay: Duration,
    ) -> Result<ScheduledHandle, TaskError>;

    /// 以固定频率重复执行，直到句柄被取消或任务 panic。
    fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn Runnable>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, TaskError>;
}
