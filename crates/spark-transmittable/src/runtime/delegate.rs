//! 上下文传递的执行器装饰器。
//!
//! # 设计背景（Why）
//! - 业务代码通常不直接持有包装器，而是把任务交给执行器；装饰执行器可以让每一次提交都自动携带上下文；
//! - 装饰器必须完整保留底层执行器的契约：取消、`remove`、返回值、关闭语义都原样委托，只替换任务参数本身。
//!
//! # 逻辑解析（How）
//! - 一个泛型结构 [`TtlExecutor<E>`] 按 `E` 实现的能力有条件地实现 [`Executor`]、[`ExecutorService`]、
//!   [`ScheduledExecutor`]；[`TtlExecutorService`] 与 [`TtlScheduledExecutor`] 是同一结构的别名；
//! - 包装总是幂等：外部织入或调用方可能已经包装过任务；
//! - `remove`/`remove_if` 在比较前先解包队列中的候选任务，使调用方可以用原始任务定位已提交的包装器。

use std::sync::Arc;
use std::time::Duration;

use super::executor::{Executor, ExecutorService, ScheduledExecutor};
use super::task::{JoinHandle, ScheduledHandle, TaskError, TaskResult};
use crate::transmitter::Transmitter;
use crate::wrap::{
    Callable, Runnable, TtlCallable, TtlRunnable, TtlTimerTask, WrapOptions, unwrap_runnable,
};

/// 为每个提交的任务捕获并传递上下文的执行器装饰器。
pub struct TtlExecutor<E> {
    inner: E,
    transmitter: Transmitter,
    options: WrapOptions,
}

/// 具备 [`ExecutorService`] 能力的装饰器。
pub type TtlExecutorService<E> = TtlExecutor<E>;

/// 具备 [`ScheduledExecutor`] 能力的装饰器。
pub type TtlScheduledExecutor<E> = TtlExecutor<E>;

impl<E> TtlExecutor<E> {
    /// 使用全局注册表与默认选项装饰 `inner`。
    pub fn new(inner: E) -> Self {
        Self::with_options(inner, Transmitter::global(), WrapOptions::new())
    }

    /// 指定注册表与包装选项；`idempotent` 总是被强制开启。
    pub fn with_options(inner: E, transmitter: Transmitter, options: WrapOptions) -> Self {
        Self {
            inner,
            transmitter,
            options: options.idempotent(true),
        }
    }

    /// 未装饰的底层执行器。
    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    pub fn options(&self) -> WrapOptions {
        self.options
    }

    fn wrap_runnable(&self, task: Arc<dyn Runnable>) -> Result<Arc<dyn Runnable>, TaskError> {
        TtlRunnable::wrap_with(self.transmitter.clone(), task, self.options).map_err(rejected)
    }

    fn wrap_repeating(&self, task: Arc<dyn Runnable>) -> Result<Arc<dyn Runnable>, TaskError> {
        TtlTimerTask::wrap_with(
            self.transmitter.clone(),
            task,
            self.options.release_after_run(false),
        )
        .map_err(rejected)
    }

    fn wrap_callable<T: 'static>(
        &self,
        task: Arc<dyn Callable<Output = T>>,
    ) -> Result<Arc<dyn Callable<Output = T>>, TaskError> {
        TtlCallable::wrap_with(self.transmitter.clone(), task, self.options).map_err(rejected)
    }
}

fn rejected(error: crate::error::TransmitError) -> TaskError {
    TaskError::Failed(error.to_string().into())
}

impl<E: Executor> Executor for TtlExecutor<E> {
    fn execute(&self, task: Arc<dyn Runnable>) -> Result<(), TaskError> {
        self.inner.execute(self.wrap_runnable(task)?)
    }

    /// 谓词先作用于解包后的原始任务；只有候选确实是包装器且第一次判定为 `false` 时，
    /// 才再以包装器本身判定一次。未包装的候选只判定一次。
    fn remove_if(&self, predicate: &mut dyn FnMut(&Arc<dyn Runnable>) -> bool) -> usize {
        self.inner.remove_if(&mut |queued| {
            let original = unwrap_runnable(Arc::clone(queued));
            predicate(&original) || (!Arc::ptr_eq(&original, queued) && predicate(queued))
        })
    }

    fn remove(&self, task: &Arc<dyn Runnable>) -> bool {
        let target = unwrap_runnable(Arc::clone(task));
        self.inner.remove_if(&mut |queued| {
            Arc::ptr_eq(queued, task) || Arc::ptr_eq(&unwrap_runnable(Arc::clone(queued)), &target)
        }) > 0
    }
}

impl<E: ExecutorService> ExecutorService for TtlExecutor<E> {
    fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    fn submit<T>(&self, task: Arc<dyn Callable<Output = T>>) -> Result<JoinHandle<T>, TaskError>
    where
        T: Send + 'static,
    {
        self.inner.submit(self.wrap_callable(task)?)
    }

    fn invoke_all<T>(
        &self,
        tasks: Vec<Arc<dyn Callable<Output = T>>>,
    ) -> Result<Vec<TaskResult<T>>, TaskError>
    where
        T: Send + 'static,
    {
        let wrapped = tasks
            .into_iter()
            .map(|task| self.wrap_callable(task))
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.invoke_all(wrapped)
    }

    fn invoke_any<T>(&self, tasks: Vec<Arc<dyn Callable<Output = T>>>) -> TaskResult<T>
    where
        T: Send + 'static,
    {
        let wrapped = tasks
            .into_iter()
            .map(|task| self.wrap_callable(task))
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.invoke_any(wrapped)
    }
}

impl<E: ScheduledExecutor> ScheduledExecutor for TtlExecutor<E> {
    fn schedule(
        &self,
        task: Arc<dyn Runnable>,
        delay: Duration,
    ) -> Result<ScheduledHandle, TaskError> {
        self.inner.schedule(self.wrap_runnable(task)?, delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn Runnable>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, TaskError> {
        self.inner
            .schedule_at_fixed_rate(self.wrap_repeating(task)?, initial_delay, period)
    }
}

impl<E: core::fmt::Debug> core::fmt::Debug for TtlExecutor<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TtlExecutor")
            .field("inner", &self.inner)
            .field("options", &self.options)
            .finish()
    }
}

/// 以扩展方法的形式装饰执行器。
pub trait TransmitExecutorExt: Executor + Sized {
    fn transmitting(self) -> TtlExecutor<Self> {
        TtlExecutor::new(self)
    }
}

impl<E: Executor> TransmitExecutorExt for E {}
