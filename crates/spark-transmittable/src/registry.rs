//! 进程级槽位注册表。
//!
//! # 设计背景（Why）
//! - 每次捕获都要遍历“当前注册的全部槽位”，而注册/注销相对罕见：读远多于写；
//! - 因此沿用热插拔 Handler 链路的做法：`ArcSwap` 保存不可变快照，读路径无锁地取得 `Arc`，
//!   写路径在互斥锁内复制、修改、原子替换。
//!
//! # 契约说明（What）
//! - 一次捕获看到的是某个时间点的注册集合：之后注册的槽位不在本次快照中；之后注销的槽位仍可由挂起的备份
//!   安全处理（恢复不会失败，也不会把旧值复活进已注销的槽位）；
//! - 注册表并发变更不是错误，迭代永远基于一份完整快照，不会观察到半更新状态。
//!
//! # 风险提示（Trade-offs）
//! - 写操作复制整张表，复杂度 O(n)；槽位数量通常很小，换来的是捕获路径零锁；
//! - 写者之间通过 `parking_lot::Mutex` 线性化，避免 `rcu` 闭包重试带来的副作用重复执行。

use core::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread::LocalKey;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::slot::{ContextSlot, CopyPolicy, SlotHandle, SlotId};
use crate::transmittee::{ErasedTransmittee, ThreadLocalTransmittee, Transmittee};

static GLOBAL: OnceLock<Arc<SlotRegistry>> = OnceLock::new();

/// 参与者在注册表中的身份。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParticipantKey {
    /// 以 `Arc` 指针区分的自定义参与者。
    Pointer(usize),
    /// 以 `LocalKey` 地址区分的线程局部变量适配器。
    ThreadLocal(usize),
}

#[derive(Clone)]
pub(crate) struct Participant {
    key: ParticipantKey,
    pub(crate) transmittee: Arc<dyn ErasedTransmittee>,
}

pub(crate) type SlotTable = HashMap<SlotId, Arc<dyn SlotHandle>>;

/// 槽位与传递参与者的并发注册表。
pub struct SlotRegistry {
    slots: ArcSwap<SlotTable>,
    participants: ArcSwap<Vec<Participant>>,
    writer: Mutex<()>,
}

impl SlotRegistry {
    /// 创建独立的空注册表，通常用于隔离测试或嵌入式宿主。
    pub fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(HashMap::new()),
            participants: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// 进程级全局注册表，[`ContextSlot::new`] 默认注册到这里。
    pub fn global() -> &'static Arc<SlotRegistry> {
        GLOBAL.get_or_init(|| Arc::new(SlotRegistry::new()))
    }

    /// 注册槽位；已存在时返回 `false`。
    pub fn register<T>(&self, slot: &ContextSlot<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.register_handle(slot.handle())
    }

    /// 注销槽位；不存在时返回 `false`。
    pub fn unregister<T>(&self, slot: &ContextSlot<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.unregister_id(slot.id())
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.slots.load().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.load().is_empty()
    }

    /// 一次捕获要访问的槽位集合（时间点快照，顺序不作保证）。
    pub fn snapshot_identities(&self) -> Vec<SlotId> {
        self.slots.load().keys().copied().collect()
    }

    /// 注册自定义参与者；同一 `Arc` 重复注册返回 `false`。
    pub fn register_transmittee<T: Transmittee>(&self, transmittee: Arc<T>) -> bool {
        let key = ParticipantKey::Pointer(Arc::as_ptr(&transmittee) as *const () as usize);
        self.insert_participant(key, transmittee, false)
    }

    pub fn unregister_transmittee<T: Transmittee>(&self, transmittee: &Arc<T>) -> bool {
        let key = ParticipantKey::Pointer(Arc::as_ptr(transmittee) as *const () as usize);
        self.remove_participant(key)
    }

    /// 把普通 `thread_local!` 接入传递协议。
    ///
    /// - 未登记：登记并返回 `true`；
    /// - 已登记且 `force = false`：保持原策略，返回 `false`；
    /// - 已登记且 `force = true`：以新策略覆盖，返回 `true`。
    pub fn register_thread_local<T>(
        &self,
        key: &'static LocalKey<RefCell<T>>,
        policy: CopyPolicy<T>,
        force: bool,
    ) -> bool
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        let participant_key =
            ParticipantKey::ThreadLocal(ThreadLocalTransmittee::key_address(key));
        let adapter = Arc::new(ThreadLocalTransmittee::new(key, policy));
        self.insert_participant(participant_key, adapter, force)
    }

    pub fn unregister_thread_local<T>(&self, key: &'static LocalKey<RefCell<T>>) -> bool
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        self.remove_participant(ParticipantKey::ThreadLocal(
            ThreadLocalTransmittee::key_address(key),
        ))
    }

    pub fn participant_count(&self) -> usize {
        self.participants.load().len()
    }

    pub(crate) fn slot_table(&self) -> Arc<SlotTable> {
        self.slots.load_full()
    }

    pub(crate) fn participants(&self) -> Arc<Vec<Participant>> {
        self.participants.load_full()
    }

    fn register_handle(&self, handle: Arc<dyn SlotHandle>) -> bool {
        let _writer = self.writer.lock();
        let current = self.slots.load();
        let id = handle.id();
        if current.contains_key(&id) {
            return false;
        }
        let mut next = SlotTable::clone(&current);
        next.insert(id, Arc::clone(&handle));
        self.slots.store(Arc::new(next));
        tracing::debug!(slot = %id, name = handle.name(), "context slot registered");
        true
    }

    fn unregister_id(&self, id: SlotId) -> bool {
        let _writer = self.writer.lock();
        let current = self.slots.load();
        if !current.contains_key(&id) {
            return false;
        }
        let mut next = SlotTable::clone(&current);
        next.remove(&id);
        self.slots.store(Arc::new(next));
        tracing::debug!(slot = %id, "context slot unregistered");
        true
    }

    fn insert_participant(
        &self,
        key: ParticipantKey,
        transmittee: Arc<dyn ErasedTransmittee>,
        force: bool,
    ) -> bool {
        let _writer = self.writer.lock();
        let current = self.participants.load();
        let mut next = Vec::clone(&current);
        match next.iter_mut().find(|participant| participant.key == key) {
            Some(_) if !force => return false,
            Some(existing) => existing.transmittee = transmittee,
            None => next.push(Participant { key, transmittee }),
        }
        self.participants.store(Arc::new(next));
        tracing::debug!(participant = ?key, force, "transmittee registered");
        true
    }

    fn remove_participant(&self, key: ParticipantKey) -> bool {
        let _writer = self.writer.lock();
        let current = self.participants.load();
        if !current.iter().any(|participant| participant.key == key) {
            return false;
        }
        let next: Vec<Participant> = current
            .iter()
            .filter(|participant| participant.key != key)
            .cloned()
            .collect();
        self.participants.store(Arc::new(next));
        tracing::debug!(participant = ?key, "transmittee unregistered");
        true
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.len())
            .field("participants", &self.participant_count())
            .finish()
    }
}
