//! 分治任务的部分传递契约。
//!
//! # 覆盖范围（What）
//! - 每个子任务在派生时刻独立捕获：父任务在两次派生之间的写入只影响后派生的子任务；
//! - 父任务、子任务结束后提交方的值保持不变；
//! - 任意深度的递归派生都能读到根任务提交时的上下文。

mod support;

use spark_transmittable::runtime::{ForkJoinPool, ForkScope, RecursiveTask};
use spark_transmittable::{ContextSlot, PoolSettings};
use support::Harness;

fn pool(harness: &Harness, workers: usize) -> ForkJoinPool {
    ForkJoinPool::with_settings(
        &PoolSettings {
            workers,
            thread_name_prefix: "fork-join-contract".to_owned(),
        },
        harness.transmitter.clone(),
    )
    .expect("spawn workers")
}

struct Observe {
    slot: ContextSlot<String>,
}

impl RecursiveTask for Observe {
    type Output = Option<String>;

    fn compute(&self, _scope: &ForkScope) -> Option<String> {
        self.slot.get()
    }
}

struct MutateBetweenForks {
    slot: ContextSlot<String>,
}

impl RecursiveTask for MutateBetweenForks {
    type Output = (Option<String>, Option<String>, Option<String>);

    fn compute(&self, scope: &ForkScope) -> Self::Output {
        let left = scope.fork(Observe {
            slot: self.slot.clone(),
        });
        let next = format!("{}+1", self.slot.get().unwrap_or_default());
        self.slot.set(next);
        let right = scope.fork(Observe {
            slot: self.slot.clone(),
        });
        (left.join(), right.join(), self.slot.get())
    }
}

#[test]
fn left_child_sees_value_before_mutation_and_right_child_after() {
    for workers in [1, 4] {
        let harness = Harness::new();
        let slot = harness.slot::<String>().build();
        let pool = pool(&harness, workers);

        slot.set("A".to_owned());
        let (left, right, parent) = pool.invoke(MutateBetweenForks { slot: slot.clone() });

        assert_eq!(left.as_deref(), Some("A"), "workers = {workers}");
        assert_eq!(right.as_deref(), Some("A+1"), "workers = {workers}");
        assert_eq!(parent.as_deref(), Some("A+1"));
        assert_eq!(slot.get().as_deref(), Some("A"), "提交方的值保持不变");
    }
}

struct Fib {
    n: u32,
    scale: ContextSlot<u64>,
}

impl RecursiveTask for Fib {
    type Output = u64;

    fn compute(&self, scope: &ForkScope) -> u64 {
        if self.n < 2 {
            return u64::from(self.n) * self.scale.get().unwrap_or_default();
        }
        let left = scope.fork(Fib {
            n: self.n - 1,
            scale: self.scale.clone(),
        });
        let right = Fib {
            n: self.n - 2,
            scale: self.scale.clone(),
        }
        .compute(scope);
        left.join() + right
    }
}

#[test]
fn deep_recursion_observes_root_context() {
    let harness = Harness::new();
    let scale = harness.slot::<u64>().build();
    let pool = pool(&harness, 3);

    scale.set(10);
    let result = pool.invoke(Fib {
        n: 15,
        scale: scale.clone(),
    });
    assert_eq!(result, 610 * 10);
}

#[test]
fn submitted_root_can_be_joined_later() {
    let harness = Harness::new();
    let slot = harness.slot::<String>().build();
    let pool = pool(&harness, 2);

    slot.set("submitted".to_owned());
    let forked = pool
        .submit(Observe { slot: slot.clone() })
        .expect("pool accepts tasks");
    slot.set("changed-after-submit".to_owned());
    assert_eq!(forked.join().as_deref(), Some("submitted"));
}
