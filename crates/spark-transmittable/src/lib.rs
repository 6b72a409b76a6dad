#![deny(unsafe_code)]
#![doc = "spark-transmittable: 跨线程池传递调用上下文的捕获/重放/恢复协议。"]
#![doc = ""]
#![doc = "== 协议概览 =="]
#![doc = "1. 捕获 (capture)：提交方在交出任务前，把所有已注册槽位的当前值按拷贝策略冻结成 [`Snapshot`]。"]
#![doc = "2. 重放 (replay)：工作线程在任务体之前安装快照，同时备份并清除快照之外的槽位，得到 [`Backup`]。"]
#![doc = "3. 恢复 (restore)：任务体结束（含 panic）后写回备份，工作线程回到执行前的状态。"]
#![doc = ""]
#![doc = "== 使用层次 =="]
#![doc = "- 直接使用 [`Transmitter`] 或同名自由函数手动编排三步协议；"]
#![doc = "- 使用 [`wrap`] 中的包装器把快照与工作单元绑定；"]
#![doc = "- 使用 [`runtime::TtlExecutor`] 装饰执行器，使每次提交自动携带上下文；"]
#![doc = "- 异步任务使用 [`future::TransmitFutureExt`]，新建线程使用 [`inherit::spawn`]。"]

/// 槽位、拷贝策略与按工作线程的存储。
pub mod slot;

/// 已注册槽位与传递参与者的集合。
///
/// # 契约（What）
/// - 读路径无锁：捕获与重放读取 `ArcSwap` 中的不可变表；
/// - 写路径串行：注册与注销在写锁内复制并替换整张表。
pub mod registry;

pub mod transmittee;

pub mod snapshot;

pub mod transmitter;

pub mod wrap;

pub mod runtime;

pub mod future;

pub mod inherit;

pub mod config;

pub mod error;

pub use config::{PoolSettings, TimerSettings, TransmitSettings};
pub use error::{ConfigError, TransmitError, WrapperKind};
pub use registry::SlotRegistry;
pub use slot::{
    CaptureMode, ContextSlot, ContextSlotBuilder, CopyPolicy, SlotId, SlotState, WorkerId,
};
pub use snapshot::{Backup, Snapshot};
pub use transmittee::{ThreadLocalTransmittee, Transmittee};
pub use transmitter::{
    ReplayGuard, Transmitter, capture, clear, replay, restore, run_with_captured, run_with_clear,
};
pub use wrap::{
    CaptureTiming, Callable, Runnable, TtlCallable, TtlFnOnce, TtlRunnable, TtlTimerTask,
    WrapOptions,
};
