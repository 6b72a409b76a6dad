//! 上下文槽位的值拷贝策略。
//!
//! # 设计背景（Why）
//! - 同一个槽位在“提交方 → 工作线程”之间传递时，有时需要共享引用（例如计数器），有时必须隔离
//!   （避免子任务改写污染提交方）；
//! - 将策略建模为带标签的数据（而非通过子类覆写方法），槽位行为由构造参数决定，注册表与快照无需感知具体类型。
//!
//! # 契约说明（What）
//! - `Identity`：直接克隆 `T`。对 `Arc<Mutex<_>>` 等共享句柄而言即“按引用传递”；
//! - `ShadowCopy`：调用方提供的浅拷贝函数，通常复制外层容器、共享内部元素；
//! - `DeepCopy`：调用方提供的深拷贝函数，保证子任务与提交方完全隔离。
//!
//! # 风险提示（Trade-offs）
//! - 拷贝函数在提交方线程中执行；若函数 panic，panic 会从 `capture()` 直接传播，此时尚未创建任何包装器，
//!   不存在“半应用”的上下文状态。

use core::fmt;
use std::sync::Arc;

/// 拷贝函数的共享表示。
pub type CopyFn<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// 槽位值在捕获时采用的拷贝策略。
pub enum CopyPolicy<T> {
    Identity,
    ShadowCopy(CopyFn<T>),
    DeepCopy(CopyFn<T>),
}

impl<T> CopyPolicy<T> {
    /// 以浅拷贝函数构造策略。
    pub fn shadow(copy: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        CopyPolicy::ShadowCopy(Arc::new(copy))
    }

    /// 以深拷贝函数构造策略。
    pub fn deep(copy: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        CopyPolicy::DeepCopy(Arc::new(copy))
    }

    /// 策略名称，用于日志字段。
    pub const fn kind(&self) -> &'static str {
        match self {
            CopyPolicy::Identity => "identity",
            CopyPolicy::ShadowCopy(_) => "shadow-copy",
            CopyPolicy::DeepCopy(_) => "deep-copy",
        }
    }
}

impl<T: Clone> CopyPolicy<T> {
    /// 对当前值应用策略，返回用于传递的表示。
    pub fn apply(&self, value: &T) -> T {
        match self {
            CopyPolicy::Identity => value.clone(),
            CopyPolicy::ShadowCopy(copy) | CopyPolicy::DeepCopy(copy) => copy(value),
        }
    }
}

impl<T> Clone for CopyPolicy<T> {
    fn clone(&self) -> Self {
        match self {
            CopyPolicy::Identity => CopyPolicy::Identity,
            CopyPolicy::ShadowCopy(copy) => CopyPolicy::ShadowCopy(Arc::clone(copy)),
            CopyPolicy::DeepCopy(copy) => CopyPolicy::DeepCopy(Arc::clone(copy)),
        }
    }
}

impl<T> Default for CopyPolicy<T> {
    fn default() -> Self {
        CopyPolicy::Identity
    }
}

impl<T> fmt::Debug for CopyPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}
