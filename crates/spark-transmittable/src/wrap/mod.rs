//! 任务包装器家族。
//!
//! # 模块定位（Why）
//! - 线程池与定时器只认识“工作单元”，不认识上下文；包装器把一次捕获与工作单元绑在一起，
//!   让任意执行器都能在不感知协议的前提下完成上下文传递；
//! - 显式代码与外部织入工具可能先后包装同一个任务，因此幂等性是契约的一部分而非便利功能。
//!
//! # 结构概览（How）
//! - [`Runnable`]/[`Callable`]：无返回值与有返回值的工作单元，闭包自动实现；
//! - [`TtlRunnable`]、[`TtlCallable`]、[`TtlTimerTask`]、[`TtlFnOnce`]：四种包装器，共享 `relay` 中的算法；
//! - 本文件：[`WrapOptions`] 以及 `wrap_*`/`unwrap_*` 门面函数。
//!
//! # 契约说明（What）
//! - 非幂等地重复包装返回 [`TransmitError::AlreadyWrapped`]；幂等时原样返回同一个包装器；
//! - `unwrap_*` 对非包装器原样返回；集合版本逐元素处理并按位置保留 `None`。

mod callable;
mod once;
mod relay;
mod runnable;
mod timer;

pub use callable::{Callable, TtlCallable};
pub use once::TtlFnOnce;
pub use runnable::{Runnable, TtlRunnable};
pub use timer::TtlTimerTask;

use core::any::Any;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::TransmitError;

/// 包装器何时捕获上下文。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTiming {
    /// 包装时在提交方线程捕获。
    #[default]
    AtWrap,
    /// 每次执行前在调用方线程捕获。
    AtRun,
}

/// 包装选项。
///
/// 默认：不释放、非幂等、包装时捕获。可直接从配置文件反序列化。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WrapOptions {
    /// 首次执行后丢弃快照，第二次执行返回 [`TransmitError::ReferenceReleased`]。
    pub release_after_run: bool,
    /// 对已包装的任务再次包装时原样返回，而不是报错。
    pub idempotent: bool,
    pub capture_timing: CaptureTiming,
}

impl WrapOptions {
    pub const fn new() -> Self {
        Self {
            release_after_run: false,
            idempotent: false,
            capture_timing: CaptureTiming::AtWrap,
        }
    }

    pub const fn release_after_run(mut self, release: bool) -> Self {
        self.release_after_run = release;
        self
    }

    pub const fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub const fn capture_timing(mut self, timing: CaptureTiming) -> Self {
        self.capture_timing = timing;
        self
    }
}

/// 包装无返回值任务，在当前线程捕获上下文。
pub fn wrap_runnable(
    task: Arc<dyn Runnable>,
    options: WrapOptions,
) -> Result<Arc<dyn Runnable>, TransmitError> {
    TtlRunnable::wrap(task, options)
}

/// 包装有返回值任务。
pub fn wrap_callable<R>(
    task: Arc<dyn Callable<Output = R>>,
    options: WrapOptions,
) -> Result<Arc<dyn Callable<Output = R>>, TransmitError>
where
    R: 'static,
{
    TtlCallable::wrap(task, options)
}

/// 包装定时器回调；`release_after_run` 对周期回调没有意义，会被拒绝。
pub fn wrap_timer_task(
    task: Arc<dyn Runnable>,
    options: WrapOptions,
) -> Result<Arc<dyn Runnable>, TransmitError> {
    TtlTimerTask::wrap(task, options)
}

/// 包装一次性闭包。
pub fn wrap_fn_once<F, R>(task: F) -> TtlFnOnce<F>
where
    F: FnOnce() -> R,
{
    TtlFnOnce::new(task)
}

/// 逐个包装，按位置保留 `None`；任一元素失败则整体失败。
pub fn wrap_runnables<I>(
    tasks: I,
    options: WrapOptions,
) -> Result<Vec<Option<Arc<dyn Runnable>>>, TransmitError>
where
    I: IntoIterator<Item = Option<Arc<dyn Runnable>>>,
{
    tasks
        .into_iter()
        .map(|task| task.map(|task| wrap_runnable(task, options)).transpose())
        .collect()
}

pub fn wrap_callables<R, I>(
    tasks: I,
    options: WrapOptions,
) -> Result<Vec<Option<Arc<dyn Callable<Output = R>>>>, TransmitError>
where
    R: 'static,
    I: IntoIterator<Item = Option<Arc<dyn Callable<Output = R>>>>,
{
    tasks
        .into_iter()
        .map(|task| task.map(|task| wrap_callable(task, options)).transpose())
        .collect()
}

/// 取回被包装的原始任务；非包装器原样返回。
pub fn unwrap_runnable(task: Arc<dyn Runnable>) -> Arc<dyn Runnable> {
    let any: &dyn Any = &*task;
    if let Some(wrapper) = any.downcast_ref::<TtlRunnable>() {
        return Arc::clone(wrapper.inner());
    }
    if let Some(wrapper) = any.downcast_ref::<TtlTimerTask>() {
        return Arc::clone(wrapper.inner());
    }
    task
}

pub fn unwrap_callable<R>(task: Arc<dyn Callable<Output = R>>) -> Arc<dyn Callable<Output = R>>
where
    R: 'static,
{
    let any: &dyn Any = &*task;
    match any.downcast_ref::<TtlCallable<R>>() {
        Some(wrapper) => Arc::clone(wrapper.inner()),
        None => task,
    }
}

pub fn unwrap_runnables<I>(tasks: I) -> Vec<Option<Arc<dyn Runnable>>>
where
    I: IntoIterator<Item = Option<Arc<dyn Runnable>>>,
{
    tasks
        .into_iter()
        .map(|task| task.map(unwrap_runnable))
        .collect()
}

pub fn unwrap_callables<R, I>(tasks: I) -> Vec<Option<Arc<dyn Callable<Output = R>>>>
where
    R: 'static,
    I: IntoIterator<Item = Option<Arc<dyn Callable<Output = R>>>>,
{
    tasks
        .into_iter()
        .map(|task| task.map(unwrap_callable))
        .collect()
}

/// 任务是否已被包装（任意 runnable 类包装器）。
pub fn is_wrapped(task: &dyn Runnable) -> bool {
    let any: &dyn Any = task;
    any.is::<TtlRunnable>() || any.is::<TtlTimerTask>()
}

/// 有返回值任务是否已被包装。
pub fn is_wrapped_callable<R: 'static>(task: &dyn Callable<Output = R>) -> bool {
    let any: &dyn Any = task;
    any.is::<TtlCallable<R>>()
}
