use core::any::Any;
use core::fmt;
use std::sync::Arc;

use super::WrapOptions;
use super::relay::Relay;
use crate::error::{TransmitError, WrapperKind};
use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

/// 无返回值的工作单元。
///
/// 以 `&self` 执行，使同一任务可以被执行器或定时器重复调用；闭包 `Fn()` 自动实现。
pub trait Runnable: Any + Send + Sync + 'static {
    fn run(&self);
}

impl<F> Runnable for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

/// 携带上下文快照的 [`Runnable`]。
///
/// # 教案式说明
/// - **意图 (Why)**：把提交时的上下文随任务一起交给线程池；
/// - **逻辑 (How)**：执行时重放快照、运行原任务、在守卫中恢复；
/// - **契约 (What)**：`try_run` 以 `Result` 报告 [`TransmitError::ReferenceReleased`]；
///   通过 [`Runnable::run`] 调用时，契约违例会以携带错误信息的 panic 立即暴露。
pub struct TtlRunnable {
    task: Arc<dyn Runnable>,
    relay: Relay,
}

impl TtlRunnable {
    /// 使用全局注册表包装；已包装的任务按 `idempotent` 原样返回或报错。
    pub fn wrap(
        task: Arc<dyn Runnable>,
        options: WrapOptions,
    ) -> Result<Arc<dyn Runnable>, TransmitError> {
        Self::wrap_with(Transmitter::global(), task, options)
    }

    pub fn wrap_with(
        transmitter: Transmitter,
        task: Arc<dyn Runnable>,
        options: WrapOptions,
    ) -> Result<Arc<dyn Runnable>, TransmitError> {
        if super::is_wrapped(&*task) {
            return if options.idempotent {
                Ok(task)
            } else {
                Err(TransmitError::AlreadyWrapped {
                    kind: WrapperKind::Runnable,
                })
            };
        }
        Ok(Arc::new(Self {
            task,
            relay: Relay::new(WrapperKind::Runnable, transmitter, options),
        }))
    }

    /// 若 `task` 是本包装器则返回其引用。
    pub fn downcast(task: &dyn Runnable) -> Option<&TtlRunnable> {
        let any: &dyn Any = task;
        any.downcast_ref::<TtlRunnable>()
    }

    pub fn try_run(&self) -> Result<(), TransmitError> {
        self.relay.relay(|| self.task.run())
    }

    pub fn inner(&self) -> &Arc<dyn Runnable> {
        &self.task
    }

    pub fn options(&self) -> WrapOptions {
        self.relay.options()
    }

    /// 包装时捕获的快照；延迟捕获或已释放时为 `None`。
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.relay.snapshot()
    }

    pub fn is_released(&self) -> bool {
        self.relay.is_released()
    }
}

impl Runnable for TtlRunnable {
    fn run(&self) {
        if let Err(error) = self.try_run() {
            panic!("{error}");
        }
    }
}

impl fmt::Debug for TtlRunnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlRunnable")
            .field("options", &self.relay.options())
            .field("released", &self.relay.is_released())
            .finish_non_exhaustive()
    }
}
