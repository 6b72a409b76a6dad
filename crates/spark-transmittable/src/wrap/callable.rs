use core::any::Any;
use core::fmt;
use std::sync::Arc;

use super::WrapOptions;
use super::relay::Relay;
use crate::error::{TransmitError, WrapperKind};
use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

/// 有返回值的工作单元；闭包 `Fn() -> R` 自动实现。
pub trait Callable: Any + Send + Sync + 'static {
    type Output;

    fn call(&self) -> Self::Output;
}

impl<F, R> Callable for F
where
    F: Fn() -> R + Send + Sync + 'static,
{
    type Output = R;

    fn call(&self) -> R {
        self()
    }
}

/// 携带上下文快照的 [`Callable`]，返回值原样透传。
pub struct TtlCallable<R> {
    task: Arc<dyn Callable<Output = R>>,
    relay: Relay,
}

impl<R: 'static> TtlCallable<R> {
    pub fn wrap(
        task: Arc<dyn Callable<Output = R>>,
        options: WrapOptions,
    ) -> Result<Arc<dyn Callable<Output = R>>, TransmitError> {
        Self::wrap_with(Transmitter::global(), task, options)
    }

    pub fn wrap_with(
        transmitter: Transmitter,
        task: Arc<dyn Callable<Output = R>>,
        options: WrapOptions,
    ) -> Result<Arc<dyn Callable<Output = R>>, TransmitError> {
        let any: &dyn Any = &*task;
        if any.is::<TtlCallable<R>>() {
            return if options.idempotent {
                Ok(task)
            } else {
                Err(TransmitError::AlreadyWrapped {
                    kind: WrapperKind::Callable,
                })
            };
        }
        Ok(Arc::new(Self {
            task,
            relay: Relay::new(WrapperKind::Callable, transmitter, options),
        }))
    }

    pub fn downcast(task: &dyn Callable<Output = R>) -> Option<&TtlCallable<R>> {
        let any: &dyn Any = task;
        any.downcast_ref::<TtlCallable<R>>()
    }

    pub fn try_call(&self) -> Result<R, TransmitError> {
        self.relay.relay(|| self.task.call())
    }

    pub fn inner(&self) -> &Arc<dyn Callable<Output = R>> {
        &self.task
    }

    pub fn options(&self) -> WrapOptions {
        self.relay.options()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.relay.snapshot()
    }

    pub fn is_released(&self) -> bool {
        self.relay.is_released()
    }
}

impl<R: 'static> Callable for TtlCallable<R> {
    type Output = R;

    fn call(&self) -> R {
        match self.try_call() {
            Ok(output) => output,
            Err(error) => panic!("{error}"),
        }
    }
}

impl<R> fmt::Debug for TtlCallable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCallable")
            .field("options", &self.relay.options())
            .field("released", &self.relay.is_released())
            .finish_non_exhaustive()
    }
}
