//! 所有包装器共享的“持有快照 → 重放 → 执行 → 恢复”算法。
//!
//! # 逻辑解析（How）
//! - `AtWrap`：构造时捕获，快照放在 `ArcSwapOption` 中；`AtRun`：每次执行前在调用方线程捕获；
//! - `release_after_run` 时两种时机共用同一个 `released` 原子位：执行前以 `swap(true)` 竞争，
//!   只有首个调用者获胜；`AtWrap` 的获胜者随后取走快照，释放对捕获值的引用。
//!
//! # 契约说明（What）
//! - 第二次执行已释放的包装器返回 [`TransmitError::ReferenceReleased`]，任务体不会运行；
//! - 恢复由 [`Transmitter::run_with_captured`] 的守卫保证，任务体 panic 时同样执行。
//!
//! 启用 `loom-model` 特性并以 `--cfg loom`/`--cfg spark_loom` 编译时，释放位切换为 Loom 的原子类型，
//! 使模型检查覆盖并发调用者之间的交接。

#[cfg(not(all(feature = "loom-model", any(loom, spark_loom))))]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(all(feature = "loom-model", any(loom, spark_loom)))]
use loom::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::{CaptureTiming, WrapOptions};
use crate::error::{TransmitError, WrapperKind};
use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

enum Holder {
    Captured(ArcSwapOption<Snapshot>),
    Deferred,
}

pub(crate) struct Relay {
    kind: WrapperKind,
    transmitter: Transmitter,
    options: WrapOptions,
    holder: Holder,
    released: AtomicBool,
}

impl Relay {
    pub(crate) fn new(kind: WrapperKind, transmitter: Transmitter, options: WrapOptions) -> Self {
        let holder = match options.capture_timing {
            CaptureTiming::AtWrap => {
                Holder::Captured(ArcSwapOption::from_pointee(transmitter.capture()))
            }
            CaptureTiming::AtRun => Holder::Deferred,
        };
        Self {
            kind,
            transmitter,
            options,
            holder,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn options(&self) -> WrapOptions {
        self.options
    }

    /// 构造时捕获的快照；延迟捕获或已释放时为 `None`。
    pub(crate) fn snapshot(&self) -> Option<Snapshot> {
        if self.is_released() {
            return None;
        }
        match &self.holder {
            Holder::Captured(snapshot) => snapshot
                .load_full()
                .map(|snapshot| Snapshot::clone(&snapshot)),
            Holder::Deferred => None,
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.options.release_after_run && self.released.load(Ordering::Acquire)
    }

    /// 在传递的上下文中执行 `body`。
    pub(crate) fn relay<R>(&self, body: impl FnOnce() -> R) -> Result<R, TransmitError> {
        let snapshot = self.acquire()?;
        Ok(self.transmitter.run_with_captured(&snapshot, body))
    }

    fn acquire(&self) -> Result<Arc<Snapshot>, TransmitError> {
        let released = TransmitError::ReferenceReleased { kind: self.kind };
        if self.options.release_after_run && self.released.swap(true, Ordering::AcqRel) {
            return Err(released);
        }
        match &self.holder {
            Holder::Captured(snapshot) if self.options.release_after_run => {
                snapshot.swap(None).ok_or(released)
            }
            Holder::Captured(snapshot) => snapshot.load_full().ok_or(released),
            Holder::Deferred => Ok(Arc::new(self.transmitter.capture())),
        }
    }
}
