//! 传递层配置。
//!
//! # 设计背景（Why）
//! - 包装选项与执行器参数常由部署方统一下发；以 `serde` 反序列化 TOML，缺省字段回落到默认值，
//!   使配置文件只需书写与默认不同的部分；
//! - 反序列化只保证结构正确，数值与名称的合法性由 [`TransmitSettings::validate`] 单独校验。
//!
//! # 契约说明（What）
//! - 线程池工作线程数必须大于零，线程名称不能为空；
//! - 校验失败返回 [`ConfigError`]，不会静默修正。
//!
//! ```toml
//! [wrap]
//! release_after_run = true
//! capture_timing = "at_run"
//!
//! [pool]
//! workers = 8
//! thread_name_prefix = "biz-worker"
//!
//! [timer]
//! thread_name = "biz-timer"
//! ```

use serde::Deserialize;

use crate::error::ConfigError;
use crate::wrap::WrapOptions;

/// 固定线程池参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub workers: usize,
    /// 工作线程名为 `{prefix}-{index}`。
    pub thread_name_prefix: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, usize::from),
            thread_name_prefix: "spark-transmit-worker".to_owned(),
        }
    }
}

/// 定时器参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub thread_name: String,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            thread_name: "spark-transmit-timer".to_owned(),
        }
    }
}

/// 传递层的完整配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransmitSettings {
    pub wrap: WrapOptions,
    pub pool: PoolSettings,
    pub timer: TimerSettings,
}

impl TransmitSettings {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        tracing::debug!(
            workers = settings.pool.workers,
            release_after_run = settings.wrap.release_after_run,
            capture_timing = ?settings.wrap.capture_timing,
            "transmit settings loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::NonPositive {
                field: "pool.workers",
            });
        }
        if self.pool.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "pool.thread_name_prefix",
            });
        }
        if self.timer.thread_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "timer.thread_name",
            });
        }
        Ok(())
    }
}
