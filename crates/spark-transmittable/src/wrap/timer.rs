use core::any::Any;
use core::fmt;
use std::sync::Arc;

use super::relay::Relay;
use super::{Runnable, WrapOptions};
use crate::error::{TransmitError, WrapperKind};
use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

/// 定时器回调包装器。
///
/// 与 [`TtlRunnable`](super::TtlRunnable) 的区别只在于调度器会反复调用同一个包装器：
/// 一次捕获被每次触发共享，`release_after_run` 因此被拒绝。
pub struct TtlTimerTask {
    task: Arc<dyn Runnable>,
    relay: Relay,
}

impl TtlTimerTask {
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
        if options.release_after_run {
            return Err(TransmitError::UnsupportedOption {
                kind: WrapperKind::TimerTask,
                option: "release_after_run",
            });
        }
        if super::is_wrapped(&*task) {
            return if options.idempotent {
                Ok(task)
            } else {
                Err(TransmitError::AlreadyWrapped {
                    kind: WrapperKind::TimerTask,
                })
            };
        }
        Ok(Arc::new(Self {
            task,
            relay: Relay::new(WrapperKind::TimerTask, transmitter, options),
        }))
    }

    pub fn downcast(task: &dyn Runnable) -> Option<&TtlTimerTask> {
        let any: &dyn Any = task;
        any.downcast_ref::<TtlTimerTask>()
    }

    pub fn try_run(&self) -> Result<(), TransmitError> {
        self.relay.relay(|| self.task.run())
    }

    pub fn inner(&self) -> &Arc<dyn Runnable> {
        &self.task
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.relay.snapshot()
    }
}

impl Runnable for TtlTimerTask {
    fn run(&self) {
        if let Err(error) = self.try_run() {
            panic!("{error}");
        }
    }
}

impl fmt::Debug for TtlTimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlTimerTask")
            .field("options", &self.relay.options())
            .finish_non_exhaustive()
    }
}
