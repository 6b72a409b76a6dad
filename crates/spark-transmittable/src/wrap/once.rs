use core::fmt;

use crate::snapshot::Snapshot;
use crate::transmitter::Transmitter;

/// 一次性闭包包装器。
///
/// `FnOnce` 只能被调用一次，单次使用由所有权保证：`call` 消费包装器本身，
/// 因而不存在 `release_after_run` 与重复包装的运行期检查。
pub struct TtlFnOnce<F> {
    task: F,
    snapshot: Snapshot,
    transmitter: Transmitter,
}

impl<F, R> TtlFnOnce<F>
where
    F: FnOnce() -> R,
{
    /// 在当前线程捕获全局注册表的上下文。
    pub fn new(task: F) -> Self {
        Self::with_transmitter(Transmitter::global(), task)
    }

    pub fn with_transmitter(transmitter: Transmitter, task: F) -> Self {
        Self {
            snapshot: transmitter.capture(),
            task,
            transmitter,
        }
    }

    /// 在捕获的上下文中执行并消费包装器。
    pub fn call(self) -> R {
        let Self {
            task,
            snapshot,
            transmitter,
        } = self;
        transmitter.run_with_captured(&snapshot, task)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// 丢弃快照，取回原始闭包。
    pub fn into_inner(self) -> F {
        self.task
    }
}

impl<F> fmt::Debug for TtlFnOnce<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlFnOnce")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}
