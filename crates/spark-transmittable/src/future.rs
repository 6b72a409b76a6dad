//! 异步任务的上下文传递。
//!
//! # 设计背景（Why）
//! - 异步任务的每一次 `poll` 都可能落在不同的执行器线程上，线程槽位在两次 `poll` 之间没有意义；
//! - 因此传递必须以 `poll` 为粒度：构造时捕获一次，每次 `poll` 前重放、返回后恢复。
//!
//! # 逻辑解析（How）
//! - 内部 future 放入 `Pin<Box<_>>`，使 [`Transmitting`] 本身满足 `Unpin`，无需投影；
//! - `poll` 通过 [`Transmitter::run_with_captured`] 执行，内部 future panic 时恢复同样发生。
//!
//! # 契约说明（What）
//! - 内部 future 在 `poll` 中对槽位的写入不会跨 `poll` 保留：每次都从同一份快照出发；
//! - 执行器线程在 `poll` 返回后回到原状态。

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

/// 在每次 `poll` 前后重放/恢复构造时快照的 future。
pub struct Transmitting<F> {
    inner: Pin<Box<F>>,
    snapshot: Snapshot,
    transmitter: Transmitter,
}

impl<F: Future> Transmitting<F> {
    /// 在当前线程捕获全局注册表的上下文。
    pub fn new(inner: F) -> Self {
        Self::with_transmitter(Transmitter::global(), inner)
    }

    pub fn with_transmitter(transmitter: Transmitter, inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
            snapshot: transmitter.capture(),
            transmitter,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl<F: Future> Future for Transmitting<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        this.transmitter
            .run_with_captured(&this.snapshot, || inner.as_mut().poll(cx))
    }
}

impl<F> fmt::Debug for Transmitting<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitting")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

/// 以扩展方法的形式为 future 附加上下文。
pub trait TransmitFutureExt: Future + Sized {
    fn transmitting(self) -> Transmitting<Self> {
        Transmitting::new(self)
    }

    fn transmitting_with(self, transmitter: Transmitter) -> Transmitting<Self> {
        Transmitting::with_transmitter(transmitter, self)
    }
}

impl<F: Future> TransmitFutureExt for F {}
