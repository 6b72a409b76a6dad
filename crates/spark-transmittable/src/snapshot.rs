//! 捕获快照与恢复令牌。
//!
//! # 设计背景（Why）
//! - 捕获结果需要跨线程移动，并可能被周期任务反复重放，因此 [`Snapshot`] 是 `Send + Sync + Clone`
//!   的不可变值，克隆只是一次引用计数；
//! - 备份只能在产生它的工作线程上消费：[`Backup`] 内含 `Box<dyn Any>`，天然 `!Send`，
//!   由类型系统阻止把恢复令牌带到别的线程。
//!
//! # 契约说明（What）
//! - 快照条目只包含捕获时“非缺席”的槽位；
//! - 备份记录重放触碰过的每个槽位的原状态（包括 `Absent`），以及需要触发 `after_execute` 的槽位集合；
//! - `Backup` 标注 `#[must_use]`：丢弃令牌而不恢复，等价于把任务上下文泄漏给下一个任务。

use core::fmt;
use std::sync::Arc;

use crate::registry::{Participant, SlotRegistry};
use crate::slot::{CapturedValue, ContextSlot, PreviousValue, SlotHandle, SlotId, SlotState};
use crate::transmittee::{ErasedBackup, ErasedCapture};

pub(crate) struct CapturedSlot {
    pub(crate) handle: Arc<dyn SlotHandle>,
    pub(crate) value: CapturedValue,
}

pub(crate) struct CapturedParticipant {
    pub(crate) participant: Participant,
    pub(crate) value: ErasedCapture,
}

struct SnapshotInner {
    slots: Vec<CapturedSlot>,
    participants: Vec<CapturedParticipant>,
}

/// 一次捕获的结果。
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub(crate) fn from_parts(
        slots: Vec<CapturedSlot>,
        participants: Vec<CapturedParticipant>,
    ) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                slots,
                participants,
            }),
        }
    }

    /// 不含任何条目的快照；重放它等价于 `clear`。
    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    /// 快照中的槽位条目数（不含传递参与者）。
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty() && self.inner.participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.participants.len()
    }

    pub fn contains<T>(&self, slot: &ContextSlot<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.position(slot.id()).is_some()
    }

    /// 快照为某个槽位记录的传递表示；缺席时返回 `None`。
    pub fn captured<T>(&self, slot: &ContextSlot<T>) -> Option<SlotState<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = &self.inner.slots[self.position(slot.id())?];
        entry.value.downcast_ref::<SlotState<T>>().cloned()
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.inner.slots.iter().map(|entry| entry.handle.id())
    }

    pub(crate) fn slots(&self) -> &[CapturedSlot] {
        &self.inner.slots
    }

    pub(crate) fn participants(&self) -> &[CapturedParticipant] {
        &self.inner.participants
    }

    /// 两个句柄是否指向同一次捕获。
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn position(&self, id: SlotId) -> Option<usize> {
        self.inner
            .slots
            .iter()
            .position(|entry| entry.handle.id() == id)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<SlotId> = self.inner.slots.iter().map(|entry| entry.handle.id()).collect();
        f.debug_struct("Snapshot")
            .field("slots", &slots)
            .field("participants", &self.inner.participants.len())
            .finish()
    }
}

pub(crate) struct SlotBackup {
    pub(crate) handle: Arc<dyn SlotHandle>,
    pub(crate) previous: PreviousValue,
}

pub(crate) struct ParticipantBackup {
    pub(crate) participant: Participant,
    pub(crate) previous: ErasedBackup,
}

/// 重放或清空返回的恢复令牌。
///
/// 只能交给 [`Transmitter::restore`](crate::Transmitter::restore)，且只能在产生它的线程上使用。
#[must_use = "a backup that is never restored leaks the replayed context into the next task"]
pub struct Backup {
    pub(crate) registry: Arc<SlotRegistry>,
    pub(crate) slots: Vec<SlotBackup>,
    pub(crate) installed: Vec<Arc<dyn SlotHandle>>,
    pub(crate) participants: Vec<ParticipantBackup>,
}

impl Backup {
    /// 备份覆盖的槽位数量。
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.participants.is_empty()
    }

    /// 备份是否记录了某个槽位（无论原状态是否缺席）。
    pub fn covers<T>(&self, slot: &ContextSlot<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = slot.id();
        self.slots.iter().any(|entry| entry.handle.id() == id)
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("slots", &self.slots.iter().map(|entry| entry.handle.id()).collect::<Vec<_>>())
            .field("installed", &self.installed.len())
            .field("participants", &self.participants.len())
            .finish()
    }
}
