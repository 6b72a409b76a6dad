//! 执行器层：契约、最小实现与上下文传递装饰器。
//!
//! # 模块划分
//! - [`executor`]：`Executor`/`ExecutorService`/`ScheduledExecutor` 三层契约；
//! - [`pool`]、[`timer`]、[`fork_join`]：固定线程池、单线程定时器与分治任务池；
//! - [`delegate`]：为任意执行器织入传递协议的装饰器；
//! - [`task`]：结果句柄与错误类型。

pub mod delegate;
pub mod executor;
pub mod fork_join;
pub mod pool;
pub mod task;
pub mod timer;

pub use delegate::{TransmitExecutorExt, TtlExecutor, TtlExecutorService, TtlScheduledExecutor};
pub use executor::{Executor, ExecutorService, ScheduledExecutor};
pub use fork_join::{ForkJoinPool, ForkScope, Forked, RecursiveTask};
pub use pool::FixedThreadPool;
pub use task::{JoinHandle, ScheduledHandle, TaskError, TaskResult};
pub use timer::Timer;
