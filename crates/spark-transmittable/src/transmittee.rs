//! 可插拔的传递参与者（Transmittee）。
//!
//! # 设计背景（Why）
//! - 并非所有环境状态都以 [`ContextSlot`](crate::ContextSlot) 形式存在：外部子系统可能自带线程局部状态
//!   （日志 MDC、遗留 `thread_local!` 等），它们同样需要随任务跨线程池传递；
//! - `Transmittee` 把“捕获/重放/清空/恢复”四个动作开放给这些参与者，由注册表在处理完类型化槽位之后统一调度。
//!
//! # 契约说明（What）
//! - `capture` 在提交方线程执行，结果必须 `Send + Sync` 以便随快照跨线程并被周期任务重复重放；
//! - `replay`/`clear` 在工作线程执行并返回备份；`restore` 在同一工作线程消费该备份；
//! - 实现者不得在 `restore` 中吞掉错误：恢复失败意味着陈旧上下文泄漏到下一个任务。

use core::any::Any;
use core::cell::RefCell;
use std::sync::Arc;
use std::thread::LocalKey;

use crate::slot::CopyPolicy;

/// 传递参与者。
pub trait Transmittee: Send + Sync + 'static {
    /// 捕获表示。
    type Captured: Send + Sync + 'static;
    /// 备份表示。
    type Backup: 'static;

    fn capture(&self) -> Self::Captured;

    fn replay(&self, captured: &Self::Captured) -> Self::Backup;

    /// 以“干净上下文”替换当前状态，返回备份。
    fn clear(&self) -> Self::Backup;

    fn restore(&self, backup: Self::Backup);
}

pub(crate) type ErasedCapture = Arc<dyn Any + Send + Sync>;
pub(crate) type ErasedBackup = Box<dyn Any>;

/// 注册表内部持有的类型擦除形式。
pub(crate) trait ErasedTransmittee: Send + Sync + 'static {
    fn capture(&self) -> ErasedCapture;

    fn replay(&self, captured: &ErasedCapture) -> Option<ErasedBackup>;

    fn clear(&self) -> ErasedBackup;

    fn restore(&self, backup: ErasedBackup);
}

impl<T: Transmittee> ErasedTransmittee for T {
    fn capture(&self) -> ErasedCapture {
        Arc::new(Transmittee::capture(self))
    }

    fn replay(&self, captured: &ErasedCapture) -> Option<ErasedBackup> {
        match captured.downcast_ref::<T::Captured>() {
            Some(captured) => Some(Box::new(Transmittee::replay(self, captured))),
            None => {
                tracing::error!(
                    transmittee = core::any::type_name::<T>(),
                    "captured value type mismatch, replay skipped"
                );
                None
            }
        }
    }

    fn clear(&self) -> ErasedBackup {
        Box::new(Transmittee::clear(self))
    }

    fn restore(&self, backup: ErasedBackup) {
        match backup.downcast::<T::Backup>() {
            Ok(backup) => Transmittee::restore(self, *backup),
            Err(_) => tracing::error!(
                transmittee = core::any::type_name::<T>(),
                "backup value type mismatch, restore skipped"
            ),
        }
    }
}

/// 把普通 `thread_local!` 中的 `RefCell<T>` 接入传递协议。
///
/// # 教案式说明
/// - **意图 (Why)**：遗留代码常以 `thread_local!` 保存请求级状态，改造为 [`ContextSlot`](crate::ContextSlot)
///   成本较高；注册该适配器即可让其随任务传递；
/// - **逻辑 (How)**：捕获时对当前值应用拷贝策略；重放时以 `replace` 安装并返回旧值；清空时写入 `T::default()`；
/// - **契约 (What)**：`T: Clone + Default`；同一 `LocalKey` 在注册表中最多登记一次，重复登记需显式 `force`。
pub struct ThreadLocalTransmittee<T: 'static> {
    key: &'static LocalKey<RefCell<T>>,
    policy: CopyPolicy<T>,
}

impl<T> ThreadLocalTransmittee<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new(key: &'static LocalKey<RefCell<T>>, policy: CopyPolicy<T>) -> Self {
        Self { key, policy }
    }

    pub(crate) fn key_address(key: &'static LocalKey<RefCell<T>>) -> usize {
        key as *const LocalKey<RefCell<T>> as usize
    }
}

impl<T> Transmittee for ThreadLocalTransmittee<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    type Captured = T;
    type Backup = T;

    fn capture(&self) -> T {
        self.key.with(|cell| self.policy.apply(&cell.borrow()))
    }

    fn replay(&self, captured: &T) -> T {
        self.key.with(|cell| cell.replace(captured.clone()))
    }

    fn clear(&self) -> T {
        self.key.with(|cell| cell.take())
    }

    fn restore(&self, backup: T) {
        self.key.with(|cell| {
            cell.replace(backup);
        });
    }
}
