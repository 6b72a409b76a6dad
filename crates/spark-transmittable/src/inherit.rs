//! 线程创建时的上下文继承。
//!
//! # 设计背景（Why）
//! - 新建线程是传递的特例：子线程没有需要恢复的旧状态，但仍需从父线程派生初始值；
//! - 派生使用槽位的 `child_policy`，与线程池传递所用的 `copy_policy` 相互独立。
//!
//! # 契约说明（What）
//! - 在调用 [`spawn`]/[`Builder::spawn`] 的线程上以 [`CaptureMode::Inherit`] 捕获；
//! - 子线程在闭包执行期间持有派生值，闭包返回后恢复（即清空），线程随之退出。

use std::io;
use std::thread::{self, JoinHandle};

use crate::slot::CaptureMode;
use crate::transmitter::Transmitter;

/// 继承当前上下文并在新线程上运行 `body`。
///
/// # Panics
/// 线程创建失败时 panic，与 [`std::thread::spawn`] 一致。
pub fn spawn<F, R>(body: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match Builder::new().spawn(body) {
        Ok(handle) => handle,
        Err(error) => panic!("failed to spawn inheriting thread: {error}"),
    }
}

/// 可配置线程名、栈大小与注册表的继承式线程构建器。
#[derive(Debug)]
pub struct Builder {
    inner: thread::Builder,
    transmitter: Transmitter,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            inner: thread::Builder::new(),
            transmitter: Transmitter::global(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.name(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.inner = self.inner.stack_size(size);
        self
    }

    /// 从指定注册表捕获。
    pub fn transmitter(mut self, transmitter: Transmitter) -> Self {
        self.transmitter = transmitter;
        self
    }

    pub fn spawn<F, R>(self, body: F) -> io::Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let snapshot = self.transmitter.capture_with(CaptureMode::Inherit);
        let transmitter = self.transmitter;
        tracing::trace!(inherited = snapshot.len(), "spawning inheriting thread");
        self.inner
            .spawn(move || transmitter.run_with_captured(&snapshot, body))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
