//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义传递协议对外暴露的错误语义：包装器契约违例与配置解析失败；
//! - 任务体自身的错误与 panic 不在此处建模，它们在恢复完成后原样交还调用方。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`，可直接交给 `anyhow` 等上层框架；
//! - 错误消息须点名被违反的契约与包装器种类，方便在调用点就地排障。

use thiserror::Error;

/// 包装器种类，用于在错误消息与日志中标识触发契约违例的包装器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WrapperKind {
    Runnable,
    Callable,
    TimerTask,
}

impl WrapperKind {
    /// 稳定的小写名称，供日志字段使用。
    pub const fn as_str(self) -> &'static str {
        match self {
            WrapperKind::Runnable => "runnable",
            WrapperKind::Callable => "callable",
            WrapperKind::TimerTask => "timer-task",
        }
    }
}

impl core::fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传递协议的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：包装器的幂等与单次释放是外部织入代理与显式调用共存时的硬性契约，违例必须在调用点
///   立即暴露，而不是演变成难以追踪的上下文泄漏。
/// - **契约 (What)**：
///   - `AlreadyWrapped`：对已包装的任务再次执行非幂等包装；
///   - `ReferenceReleased`：`release_after_run` 包装器在快照释放后被再次执行；
///   - `UnsupportedOption`：包装器种类不接受某个选项（例如周期定时任务不接受 `release_after_run`）。
/// - **注意 (Trade-offs)**：注册表并发变更并非错误，弱一致迭代已把它定义为合法行为，因此这里没有对应变体。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransmitError {
    #[error("{kind} is already wrapped; re-wrapping requires the idempotent option")]
    AlreadyWrapped { kind: WrapperKind },

    #[error("{kind} released its captured snapshot after the first run and cannot run again")]
    ReferenceReleased { kind: WrapperKind },

    #[error("{kind} does not support the `{option}` option")]
    UnsupportedOption {
        kind: WrapperKind,
        option: &'static str,
    },
}

/// 配置加载与校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse transmit settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("`{field}` must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },
}
