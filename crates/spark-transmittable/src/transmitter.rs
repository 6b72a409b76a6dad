//! 传递协议核心：捕获、重放、恢复、清空。
//!
//! # 设计背景（Why）
//! - 提交方在交出任务前同步捕获；工作线程在任务体前后同步重放与恢复，三者都不挂起；
//! - 协议本身无状态：所有中间结果都通过 [`Snapshot`]/[`Backup`] 值在调用之间传递。
//!
//! # 逻辑解析（How）
//! - `capture`：遍历注册表快照中的槽位，收集非缺席的传递表示，再捕获全部传递参与者；
//! - `replay`：先为快照中的槽位备份并安装，再为“已注册但不在快照中”的槽位备份并移除，
//!   全部写入完成后触发安装槽位的 `before_execute`，最后重放传递参与者；
//! - `restore`：先触发 `after_execute`，再逐一写回备份；备份期间注销的槽位只移除重放值，不复活旧值；
//!   任务期间新注册的槽位同样被移除；最后逆序恢复传递参与者；
//! - `clear`：重放一个空快照。
//!
//! # 契约说明（What）
//! - 每次 `replay`/`clear` 都必须与同一线程上的一次 `restore` 配对；
//! - [`Transmitter::run_with_captured`]/[`Transmitter::run_with_clear`] 以守卫对象把恢复放进 `Drop`，
//!   任务体 panic 时同样执行恢复，随后 panic 原样向上传播；
//! - `before_execute`/`after_execute` 钩子的 panic 在槽位内被捕获并以 `warn!` 记录，
//!   不会中断重放或恢复，工作线程交还线程池时总是回到原状态。

use std::collections::HashSet;
use std::sync::Arc;

use crate::registry::SlotRegistry;
use crate::slot::{CaptureMode, SlotId};
use crate::snapshot::{
    Backup, CapturedParticipant, CapturedSlot, ParticipantBackup, SlotBackup, Snapshot,
};

/// 绑定到某个注册表的协议执行者。
#[derive(Clone, Debug)]
pub struct Transmitter {
    registry: Arc<SlotRegistry>,
}

impl Transmitter {
    pub fn new(registry: Arc<SlotRegistry>) -> Self {
        Self { registry }
    }

    /// 作用于全局注册表的执行者。
    pub fn global() -> Self {
        Self::new(Arc::clone(SlotRegistry::global()))
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    /// 在提交方线程捕获当前上下文。
    pub fn capture(&self) -> Snapshot {
        self.capture_with(CaptureMode::Transmit)
    }

    /// 按指定模式捕获；`Inherit` 使用槽位的子线程派生策略。
    pub fn capture_with(&self, mode: CaptureMode) -> Snapshot {
        let table = self.registry.slot_table();
        let slots: Vec<CapturedSlot> = table
            .values()
            .filter_map(|handle| {
                handle.capture(mode).map(|value| CapturedSlot {
                    handle: Arc::clone(handle),
                    value,
                })
            })
            .collect();
        let participants: Vec<CapturedParticipant> = self
            .registry
            .participants()
            .iter()
            .map(|participant| CapturedParticipant {
                value: participant.transmittee.capture(),
                participant: participant.clone(),
            })
            .collect();
        tracing::trace!(
            registered = table.len(),
            captured = slots.len(),
            participants = participants.len(),
            ?mode,
            "context captured"
        );
        Snapshot::from_parts(slots, participants)
    }

    /// 在工作线程安装快照，返回恢复令牌。
    pub fn replay(&self, snapshot: &Snapshot) -> Backup {
        let table = self.registry.slot_table();
        let mut slots = Vec::with_capacity(table.len());
        let mut installed = Vec::with_capacity(snapshot.len());
        let mut captured_ids: HashSet<SlotId> = HashSet::with_capacity(snapshot.len());

        for entry in snapshot.slots() {
            let id = entry.handle.id();
            if !table.contains_key(&id) {
                tracing::trace!(slot = %id, "slot unregistered since capture, replay skipped");
                continue;
            }
            captured_ids.insert(id);
            slots.push(SlotBackup {
                handle: Arc::clone(&entry.handle),
                previous: entry.handle.backup(),
            });
            entry.handle.install(&entry.value);
            installed.push(Arc::clone(&entry.handle));
        }

        for (id, handle) in table.iter() {
            if captured_ids.contains(id) {
                continue;
            }
            slots.push(SlotBackup {
                handle: Arc::clone(handle),
                previous: handle.backup(),
            });
            handle.remove();
        }

        for handle in &installed {
            handle.before_execute();
        }

        let participants = snapshot
            .participants()
            .iter()
            .filter_map(|entry| {
                entry
                    .participant
                    .transmittee
                    .replay(&entry.value)
                    .map(|previous| ParticipantBackup {
                        participant: entry.participant.clone(),
                        previous,
                    })
            })
            .collect();

        tracing::trace!(
            installed = installed.len(),
            backed_up = slots.len(),
            "context replayed"
        );
        Backup {
            registry: Arc::clone(&self.registry),
            slots,
            installed,
            participants,
        }
    }

    /// 以干净上下文替换工作线程的全部槽位与参与者状态。
    pub fn clear(&self) -> Backup {
        let mut backup = self.replay(&Snapshot::empty());
        backup.participants = self
            .registry
            .participants()
            .iter()
            .map(|participant| ParticipantBackup {
                previous: participant.transmittee.clear(),
                participant: participant.clone(),
            })
            .collect();
        backup
    }

    /// 把工作线程恢复到重放之前的状态。
    pub fn restore(&self, backup: Backup) {
        let Backup {
            registry,
            slots,
            installed,
            participants,
        } = backup;

        for handle in &installed {
            handle.after_execute();
        }

        let table = registry.slot_table();
        let mut restored: HashSet<SlotId> = HashSet::with_capacity(slots.len());
        for entry in slots {
            let id = entry.handle.id();
            restored.insert(id);
            if table.contains_key(&id) {
                entry.handle.reinstate(entry.previous);
            } else {
                tracing::debug!(
                    slot = %id,
                    "slot unregistered during task, previous value not reinstated"
                );
                entry.handle.remove();
            }
        }

        for (id, handle) in table.iter() {
            if !restored.contains(id) {
                handle.remove();
            }
        }

        for entry in participants.into_iter().rev() {
            entry.participant.transmittee.restore(entry.previous);
        }
        tracing::trace!(restored = restored.len(), "context restored");
    }

    /// 在捕获的上下文中执行 `body`，无论正常返回还是 panic 都会恢复。
    pub fn run_with_captured<R>(&self, snapshot: &Snapshot, body: impl FnOnce() -> R) -> R {
        let _guard = self.enter(snapshot);
        body()
    }

    /// 在清空的上下文中执行 `body`，无论正常返回还是 panic 都会恢复。
    pub fn run_with_clear<R>(&self, body: impl FnOnce() -> R) -> R {
        let _guard = ReplayGuard {
            transmitter: self,
            backup: Some(self.clear()),
        };
        body()
    }

    /// 重放快照并返回作用域守卫，守卫析构时恢复。
    pub fn enter(&self, snapshot: &Snapshot) -> ReplayGuard<'_> {
        ReplayGuard {
            transmitter: self,
            backup: Some(self.replay(snapshot)),
        }
    }
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::global()
    }
}

/// 重放作用域守卫。
#[must_use = "dropping the guard immediately restores the previous context"]
pub struct ReplayGuard<'a> {
    transmitter: &'a Transmitter,
    backup: Option<Backup>,
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            self.transmitter.restore(backup);
        }
    }
}

/// 使用全局注册表捕获。
pub fn capture() -> Snapshot {
    Transmitter::global().capture()
}

pub fn replay(snapshot: &Snapshot) -> Backup {
    Transmitter::global().replay(snapshot)
}

pub fn restore(backup: Backup) {
    Transmitter::global().restore(backup);
}

pub fn clear() -> Backup {
    Transmitter::global().clear()
}

pub fn run_with_captured<R>(snapshot: &Snapshot, body: impl FnOnce() -> R) -> R {
    Transmitter::global().run_with_captured(snapshot, body)
}

pub fn run_with_clear<R>(body: impl FnOnce() -> R) -> R {
    Transmitter::global().run_with_clear(body)
}
