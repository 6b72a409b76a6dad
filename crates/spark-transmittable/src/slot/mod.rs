//! 上下文槽位：参与传递协议的“线程局部变量”。
//!
//! # 模块定位（Why）
//! - 线程池复用工作线程，提交任务时工作线程早已存在，“创建线程时继承”的语义不会触发；
//! - [`ContextSlot`] 因而显式参与捕获/重放/恢复协议：提交方捕获当前值，工作线程在任务前后安装与撤销。
//!
//! # 结构概览（How）
//! - [`policy`]：拷贝策略 [`CopyPolicy`]；
//! - [`storage`]：按工作线程存储与线程退出时的清理；
//! - 本文件：槽位句柄、构建器以及供注册表使用的类型擦除接口 `SlotHandle`。
//!
//! # 契约说明（What）
//! - 槽位以实例身份（[`SlotId`]）区分，而非值相等；
//! - 未设置的槽位在存在默认值工厂时，每个工作线程只物化一次默认值并记忆；
//! - `ignore_null_on_transmit = true`（默认）时，null 值在捕获阶段视为缺席：不传递，也不会被恢复为 null。

mod policy;
mod storage;

pub use policy::{CopyFn, CopyPolicy};
pub use storage::WorkerId;

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::sync::atomic::{AtomicU64, Ordering};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::registry::SlotRegistry;
use crate::runtime::task::panic_message;
use storage::WorkerCells;

/// 槽位实例的唯一标识，进程内单调递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SlotId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 数值形式，便于日志输出。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// 槽位在某个工作线程上的三态。
///
/// - `Absent`：从未设置或已移除；读取时会触发默认值工厂；
/// - `Null`：显式设置为 null，仅在关闭“忽略 null”语义时可达；
/// - `Value`：持有值。
///
/// 同一类型同时用于捕获表示（`Absent` 表示不产生快照条目）与备份表示（`Absent` 表示恢复时移除）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotState<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> SlotState<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, SlotState::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            SlotState::Value(value) => Some(value),
            SlotState::Absent | SlotState::Null => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            SlotState::Value(value) => Some(value),
            SlotState::Absent | SlotState::Null => None,
        }
    }
}

/// 捕获时使用哪一种派生策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// 向线程池任务传递：使用槽位的 `copy_policy`。
    #[default]
    Transmit,
    /// 创建新线程时继承：使用槽位的 `child_policy`。
    Inherit,
}

/// 默认值工厂。
pub type DefaultFactory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// 任务执行前后回调，参数为工作线程上的当前值。
pub type ExecuteHook<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

/// 参与传递协议的上下文槽位。
///
/// # 教案式说明
/// - **意图 (Why)**：等价于一个“会随任务跨线程池传递”的线程局部变量；
/// - **逻辑 (How)**：句柄内部是 `Arc`，克隆开销为一次引用计数；值按工作线程存放在槽位自带的并发表中；
/// - **契约 (What)**：
///   - `get` 读取当前线程的值，未设置时按需物化默认值（每线程一次）；
///   - `set`/`set_option`/`remove` 仅影响当前线程；
///   - 构建时自动注册到所选注册表（默认全局注册表），`unregister` 之后不再参与捕获；
/// - **风险 (Trade-offs)**：`get` 返回克隆值；需要共享可变状态时请让 `T` 本身是 `Arc<..>` 之类的句柄，
///   并按需选择拷贝策略。
pub struct ContextSlot<T> {
    inner: Arc<SlotInner<T>>,
}

pub(crate) struct SlotInner<T> {
    id: SlotId,
    name: Option<Cow<'static, str>>,
    default: Option<DefaultFactory<T>>,
    copy_policy: CopyPolicy<T>,
    child_policy: CopyPolicy<T>,
    ignore_null_on_transmit: bool,
    before_execute: Option<ExecuteHook<T>>,
    after_execute: Option<ExecuteHook<T>>,
    cells: Arc<WorkerCells<T>>,
    registry: Weak<SlotRegistry>,
}

impl<T> ContextSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 使用默认配置创建并注册到全局注册表。
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// 创建带默认值工厂的槽位。
    pub fn with_default(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::builder().default_value(factory).build()
    }

    pub fn builder() -> ContextSlotBuilder<T> {
        ContextSlotBuilder::new()
    }

    pub fn id(&self) -> SlotId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn copy_policy(&self) -> &CopyPolicy<T> {
        &self.inner.copy_policy
    }

    pub fn ignores_null_on_transmit(&self) -> bool {
        self.inner.ignore_null_on_transmit
    }

    /// 读取当前工作线程的值。
    ///
    /// - 已设置：返回克隆值；
    /// - 显式 null：返回 `None`，不触发默认值工厂；
    /// - 未设置：若存在工厂则调用一次、记忆并返回，否则返回 `None`。
    pub fn get(&self) -> Option<T> {
        self.inner.get()
    }

    /// 设置当前工作线程的值。
    pub fn set(&self, value: T) {
        self.inner.store(SlotState::Value(value));
    }

    /// 以可空形式设置。
    ///
    /// 传入 `None` 时：忽略 null 语义下等价于 [`remove`](Self::remove)，否则记录显式 null。
    /// 两种情况下槽位都仍然注册在注册表中，null 只影响传递。
    pub fn set_option(&self, value: Option<T>) {
        match value {
            Some(value) => self.set(value),
            None if self.inner.ignore_null_on_transmit => self.remove(),
            None => self.inner.store(SlotState::Null),
        }
    }

    /// 清除当前工作线程的值，不调用默认值工厂。
    pub fn remove(&self) {
        self.inner.store(SlotState::Absent);
    }

    /// 当前工作线程的原始状态，不物化默认值。
    pub fn peek(&self) -> SlotState<T> {
        self.inner.cells.peek(WorkerId::current())
    }

    /// 按捕获模式计算当前值的传递表示；`SlotState::Absent` 表示不产生快照条目。
    pub fn capture_for(&self, mode: CaptureMode) -> SlotState<T> {
        self.inner.capture_for(mode)
    }

    /// 线程创建时继承所用的派生值。
    pub fn child_value(&self, parent: &T) -> T {
        self.inner.child_policy.apply(parent)
    }

    /// 重新注册到构建时绑定的注册表；已注册时返回 `false`。
    pub fn register(&self) -> bool {
        match self.inner.registry.upgrade() {
            Some(registry) => registry.register(self),
            None => false,
        }
    }

    /// 从注册表移除；此后的捕获不再包含该槽位，挂起的备份也不会把旧值复活进来。
    pub fn unregister(&self) -> bool {
        match self.inner.registry.upgrade() {
            Some(registry) => registry.unregister(self),
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner
            .registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.inner.id))
    }

    /// 注销并丢弃所有工作线程上的值。
    pub fn discard(&self) {
        self.unregister();
        self.inner.cells.clear();
    }

    /// 持有值的工作线程数量，主要用于诊断与测试。
    pub fn occupied_workers(&self) -> usize {
        self.inner.cells.occupied()
    }

    pub(crate) fn handle(&self) -> Arc<dyn SlotHandle> {
        self.inner.clone()
    }
}

impl<T> Default for ContextSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ContextSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for ContextSlot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for ContextSlot<T> {}

impl<T> Hash for ContextSlot<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> fmt::Debug for ContextSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSlot")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("copy_policy", &self.inner.copy_policy)
            .field("ignore_null_on_transmit", &self.inner.ignore_null_on_transmit)
            .finish()
    }
}

impl<T> SlotInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> Option<T> {
        let worker = WorkerId::current();
        match self.cells.peek(worker) {
            SlotState::Value(value) => Some(value),
            SlotState::Null => None,
            SlotState::Absent => self.materialize_default(worker),
        }
    }

    fn materialize_default(&self, worker: WorkerId) -> Option<T> {
        let factory = self.default.as_ref()?;
        let value = factory();
        // 工厂可能重入写入了本槽位，以已存储的结果为准，保证每线程只物化一次。
        match self.cells.peek(worker) {
            SlotState::Absent => {
                self.cells.store(worker, SlotState::Value(value.clone()));
                Some(value)
            }
            stored => stored.into_value(),
        }
    }

    fn store(&self, state: SlotState<T>) {
        self.cells.store(WorkerId::current(), state);
    }

    // 只捕获已存储的状态：未设置的槽位不在提交方物化默认值，工作线程读取时自行物化。
    fn capture_for(&self, mode: CaptureMode) -> SlotState<T> {
        match self.cells.peek(WorkerId::current()) {
            SlotState::Absent => SlotState::Absent,
            SlotState::Null if self.ignore_null_on_transmit => SlotState::Absent,
            SlotState::Null => SlotState::Null,
            SlotState::Value(value) => {
                let policy = match mode {
                    CaptureMode::Transmit => &self.copy_policy,
                    CaptureMode::Inherit => &self.child_policy,
                };
                SlotState::Value(policy.apply(&value))
            }
        }
    }

    // 钩子失败不得打断重放/恢复：逐槽位隔离 panic 并记录，其余槽位照常写入。
    fn fire(&self, phase: &'static str, hook: Option<&ExecuteHook<T>>) {
        let Some(hook) = hook else {
            return;
        };
        let current = self.cells.peek(WorkerId::current());
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(current.value()))) {
            tracing::warn!(
                slot = %self.id,
                phase,
                panic = %panic_message(&*payload),
                "execute hook panicked, context transfer continues"
            );
        }
    }
}

/// 捕获表示的类型擦除形式，可在快照之间共享、跨线程移动。
pub(crate) type CapturedValue = Arc<dyn Any + Send + Sync>;

/// 备份表示的类型擦除形式，只在产生它的工作线程上消费。
pub(crate) type PreviousValue = Box<dyn Any>;

/// 注册表与快照看到的槽位接口。
///
/// 注册表以 `Arc<dyn SlotHandle>` 持有不同 `T` 的槽位；每个方法都作用于“当前工作线程”。
pub(crate) trait SlotHandle: Send + Sync + 'static {
    fn id(&self) -> SlotId;

    fn name(&self) -> Option<&str>;

    /// 捕获当前值；`None` 表示缺席，不进入快照。
    fn capture(&self, mode: CaptureMode) -> Option<CapturedValue>;

    /// 读取工作线程的原始状态作为备份。
    fn backup(&self) -> PreviousValue;

    /// 把捕获值安装为工作线程的当前值。
    fn install(&self, captured: &CapturedValue);

    /// 把备份值写回工作线程。
    fn reinstate(&self, previous: PreviousValue);

    fn remove(&self);

    fn before_execute(&self);

    fn after_execute(&self);

    fn as_any(&self) -> &dyn Any;
}

impl<T> SlotHandle for SlotInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SlotId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn capture(&self, mode: CaptureMode) -> Option<CapturedValue> {
        match self.capture_for(mode) {
            SlotState::Absent => None,
            captured => Some(Arc::new(captured)),
        }
    }

    fn backup(&self) -> PreviousValue {
        Box::new(self.cells.peek(WorkerId::current()))
    }

    fn install(&self, captured: &CapturedValue) {
        match captured.downcast_ref::<SlotState<T>>() {
            Some(state) => self.store(state.clone()),
            None => tracing::error!(
                slot = %self.id,
                "captured value type mismatch, slot left untouched"
            ),
        }
    }

    fn reinstate(&self, previous: PreviousValue) {
        match previous.downcast::<SlotState<T>>() {
            Ok(state) => self.store(*state),
            Err(_) => tracing::error!(
                slot = %self.id,
                "backup value type mismatch, slot left untouched"
            ),
        }
    }

    fn remove(&self) {
        self.store(SlotState::Absent);
    }

    fn before_execute(&self) {
        self.fire("before_execute", self.before_execute.as_ref());
    }

    fn after_execute(&self) {
        self.fire("after_execute", self.after_execute.as_ref());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`ContextSlot`] 构建器。
///
/// 默认：无名称、无默认值、`Identity` 拷贝、忽略 null、注册到 [`SlotRegistry::global`]。
pub struct ContextSlotBuilder<T> {
    name: Option<Cow<'static, str>>,
    default: Option<DefaultFactory<T>>,
    copy_policy: CopyPolicy<T>,
    child_policy: CopyPolicy<T>,
    ignore_null_on_transmit: bool,
    before_execute: Option<ExecuteHook<T>>,
    after_execute: Option<ExecuteHook<T>>,
    registry: Option<Arc<SlotRegistry>>,
}

impl<T> ContextSlotBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            name: None,
            default: None,
            copy_policy: CopyPolicy::Identity,
            child_policy: CopyPolicy::Identity,
            ignore_null_on_transmit: true,
            before_execute: None,
            after_execute: None,
            registry: None,
        }
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn default_value(mut self, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(factory));
        self
    }

    pub fn copy_policy(mut self, policy: CopyPolicy<T>) -> Self {
        self.copy_policy = policy;
        self
    }

    /// `copy_policy(CopyPolicy::shadow(..))` 的简写。
    pub fn shadow_copy(self, copy: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        self.copy_policy(CopyPolicy::shadow(copy))
    }

    /// `copy_policy(CopyPolicy::deep(..))` 的简写。
    pub fn deep_copy(self, copy: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        self.copy_policy(CopyPolicy::deep(copy))
    }

    /// 创建线程时继承所用的策略，与传递策略相互独立。
    pub fn child_policy(mut self, policy: CopyPolicy<T>) -> Self {
        self.child_policy = policy;
        self
    }

    pub fn ignore_null_on_transmit(mut self, ignore: bool) -> Self {
        self.ignore_null_on_transmit = ignore;
        self
    }

    pub fn before_execute(mut self, hook: impl Fn(Option<&T>) + Send + Sync + 'static) -> Self {
        self.before_execute = Some(Arc::new(hook));
        self
    }

    pub fn after_execute(mut self, hook: impl Fn(Option<&T>) + Send + Sync + 'static) -> Self {
        self.after_execute = Some(Arc::new(hook));
        self
    }

    /// 注册到指定注册表而非全局注册表。
    ///
    /// 槽位只弱引用注册表，调用方需保持注册表存活；注册表释放后槽位等同于已注销。
    pub fn registry(mut self, registry: Arc<SlotRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 构建槽位并立即注册。
    pub fn build(self) -> ContextSlot<T> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::clone(SlotRegistry::global()));
        let slot = ContextSlot {
            inner: Arc::new(SlotInner {
                id: SlotId::next(),
                name: self.name,
                default: self.default,
                copy_policy: self.copy_policy,
                child_policy: self.child_policy,
                ignore_null_on_transmit: self.ignore_null_on_transmit,
                before_execute: self.before_execute,
                after_execute: self.after_execute,
                cells: WorkerCells::new(),
                registry: Arc::downgrade(&registry),
            }),
        };
        registry.register(&slot);
        slot
    }
}
