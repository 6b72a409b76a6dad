//! 槽位的按工作线程存储。
//!
//! # 设计背景（Why）
//! - Rust 的 `thread_local!` 以声明位置为粒度，无法为运行期动态创建的每个槽位实例各分配一份线程局部变量；
//! - 因此每个槽位自带一张“工作线程标识 → 值”的并发表，不同工作线程同时访问互不阻塞（`DashMap` 分片），
//!   同一单元格只会被其所属的工作线程触碰，无需跨线程同步。
//!
//! # 生命周期（How）
//! - `init`：工作线程首次写入时创建单元格，并把该槽位登记到线程退出守卫；
//! - `teardown`：显式 `remove` 把单元格置为 `Absent`（保留条目，避免反复登记）；线程退出时守卫逐一逐出
//!   该线程在所有槽位中的条目，槽位 `discard` 则清空全部条目。
//!
//! # 风险提示（Trade-offs）
//! - 旧值总是在释放分片锁之后再析构：值的 `Drop` 若回头访问同一槽位，不会与分片锁自锁。

use core::cell::RefCell;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::{DashMap, mapref::entry::Entry};

use super::SlotState;

/// 工作线程标识，按线程实例唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerId(ThreadId);

impl WorkerId {
    /// 当前执行线程的标识。
    pub fn current() -> Self {
        WorkerId(thread::current().id())
    }
}

/// 线程退出时按工作线程逐出条目的能力。
pub(crate) trait WorkerEviction: Send + Sync {
    fn evict(&self, worker: WorkerId);
}

/// 单个槽位的全部工作线程单元格。
pub(crate) struct WorkerCells<T> {
    cells: DashMap<WorkerId, SlotState<T>>,
}

impl<T> WorkerCells<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cells: DashMap::new(),
        })
    }

    /// 读取工作线程的当前状态，不触发默认值工厂。
    pub(crate) fn peek(&self, worker: WorkerId) -> SlotState<T> {
        self.cells
            .get(&worker)
            .map(|cell| cell.value().clone())
            .unwrap_or(SlotState::Absent)
    }

    /// 写入工作线程的状态；`Absent` 等价于移除。
    pub(crate) fn store(self: &Arc<Self>, worker: WorkerId, state: SlotState<T>) {
        let previous = match self.cells.entry(worker) {
            Entry::Occupied(mut occupied) => core::mem::replace(occupied.get_mut(), state),
            Entry::Vacant(vacant) => {
                if state.is_absent() {
                    return;
                }
                drop(vacant.insert(state));
                let cells: Weak<Self> = Arc::downgrade(self);
                let weak: Weak<dyn WorkerEviction> = cells;
                enroll(worker, weak);
                return;
            }
        };
        drop(previous);
    }

    /// 清空所有工作线程的条目。
    pub(crate) fn clear(&self) {
        let workers: Vec<WorkerId> = self.cells.iter().map(|cell| *cell.key()).collect();
        for worker in workers {
            drop(self.cells.remove(&worker));
        }
    }

    /// 持有值（含显式 null）的工作线程数量。
    pub(crate) fn occupied(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_absent()).count()
    }
}

impl<T> WorkerEviction for WorkerCells<T>
where
    T: Send + Sync + 'static,
{
    fn evict(&self, worker: WorkerId) {
        drop(self.cells.remove(&worker));
    }
}

/// 线程退出守卫：在线程局部存储析构时逐出本线程触碰过的全部单元格。
struct RetirementGuard {
    worker: WorkerId,
    touched: Vec<Weak<dyn WorkerEviction>>,
}

impl Drop for RetirementGuard {
    fn drop(&mut self) {
        for cells in self.touched.drain(..) {
            if let Some(cells) = cells.upgrade() {
                cells.evict(self.worker);
            }
        }
    }
}

thread_local! {
    static RETIREMENT: RefCell<Option<RetirementGuard>> = const { RefCell::new(None) };
}

fn enroll(worker: WorkerId, cells: Weak<dyn WorkerEviction>) {
    // 线程正在析构线程局部存储时登记会失败，此时条目随槽位自身释放。
    let _ = RETIREMENT.try_with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            return;
        };
        let guard = slot.get_or_insert_with(|| RetirementGuard {
            worker,
            touched: Vec::new(),
        });
        if guard.touched.len() >= 64 && guard.touched.len().is_power_of_two() {
            guard.touched.retain(|weak| weak.strong_count() > 0);
        }
        guard.touched.push(cells);
    });
}
