// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Ready structures for the three scheduling disciplines.
//!
//! One scheduler serves round-robin, static priority, and MLFQ through a tagged ready structure.
//! All three share the task table and refer to tasks by id; the scheduler itself never logs or
//! switches contexts, it only decides who runs next. Trace emission stays with the run loop.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::task::{
        TaskId,
        TaskTable,
    },
    scheduler::policy::Policy,
};
use ::arrayvec::ArrayVec;
use ::std::collections::VecDeque;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Fewest feedback levels an MLFQ may have.
pub const MIN_LEVELS: usize = 1;
/// Most feedback levels an MLFQ may have.
pub const MAX_LEVELS: usize = 8;
/// Feedback levels used when the embedder does not choose.
pub const DEFAULT_LEVELS: usize = 3;
/// Work units granted to a fresh task, and restored on dispatch when the budget has run dry
/// outside MLFQ.
pub const DEFAULT_QUANTUM: i32 = 8;
/// Milliseconds between aging steps when the embedder does not choose.
pub const DEFAULT_AGING_INTERVAL_MS: u64 = 500;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Discipline-specific container of runnable tasks.
enum ReadyQueue {
    /// Single FIFO.
    RoundRobin(VecDeque<TaskId>),
    /// Single sequence ordered by base priority, FIFO among equals.
    Priority(VecDeque<TaskId>),
    /// One FIFO per feedback level; index 0 is highest priority.
    Mlfq(ArrayVec<VecDeque<TaskId>, MAX_LEVELS>),
}

/// Scheduler core: the active discipline, its ready structure, and the MLFQ feedback knobs.
pub struct Scheduler {
    /// Active discipline.
    policy: Policy,
    /// True once the embedder called set_policy. The SCHED environment variable only applies as a
    /// default, so an explicit choice pins the policy.
    policy_chosen: bool,
    /// Ready structure for the active discipline.
    ready: ReadyQueue,
    /// Number of MLFQ levels in use.
    levels: usize,
    /// Work units granted per dispatch at each level. Fully populated up to MAX_LEVELS so level
    /// clamping can never index out of range.
    quantum_by_level: ArrayVec<i32, MAX_LEVELS>,
    /// Whether the periodic aging step runs.
    enable_aging: bool,
    /// Milliseconds between aging steps.
    aging_interval_ms: u64,
    /// Timestamp of the most recent aging step, in milliseconds since boot.
    last_age_ms: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Scheduler
impl Scheduler {
    /// Creates a scheduler with the round-robin discipline and default MLFQ knobs.
    pub fn new() -> Self {
        let mut quantum_by_level: ArrayVec<i32, MAX_LEVELS> = ArrayVec::new();
        for level in 0..MAX_LEVELS {
            quantum_by_level.push((DEFAULT_QUANTUM >> level).max(1));
        }
        Self {
            policy: Policy::default(),
            policy_chosen: false,
            ready: Self::make_ready(Policy::default(), DEFAULT_LEVELS),
            levels: DEFAULT_LEVELS,
            quantum_by_level,
            enable_aging: true,
            aging_interval_ms: DEFAULT_AGING_INTERVAL_MS,
            last_age_ms: 0,
        }
    }

    /// Active discipline.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// True when the active discipline is MLFQ.
    pub fn is_mlfq(&self) -> bool {
        self.policy == Policy::Mlfq
    }

    /// Number of feedback levels in use.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Selects the discipline explicitly, pinning it against the environment default. The ready
    /// structure is rebuilt empty, so this is meant for configuration before `run`.
    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
        self.policy_chosen = true;
        self.ready = Self::make_ready(policy, self.levels);
    }

    /// Adopts the SCHED environment selection, consulted once at run start. An explicit
    /// set_policy call always wins; unknown names leave the built-in default intact.
    pub fn adopt_env_policy(&mut self) {
        if self.policy_chosen {
            return;
        }
        if let Some(policy) = Policy::from_env() {
            debug!("adopt_env_policy(): using {:?} from the environment", policy);
            self.policy = policy;
            self.ready = Self::make_ready(policy, self.levels);
        }
    }

    /// Sets the number of feedback levels, clamped to [MIN_LEVELS, MAX_LEVELS]. Tasks queued on
    /// levels removed by a shrink drain into the new bottom level in FIFO order.
    pub fn set_levels(&mut self, levels: usize) {
        let levels: usize = levels.clamp(MIN_LEVELS, MAX_LEVELS);
        self.levels = levels;
        if let ReadyQueue::Mlfq(queues) = &mut self.ready {
            let mut rebuilt: ArrayVec<VecDeque<TaskId>, MAX_LEVELS> = (0..levels).map(|_| VecDeque::new()).collect();
            for (level, queue) in queues.iter_mut().enumerate() {
                let target: usize = level.min(levels - 1);
                rebuilt[target].extend(queue.drain(..));
            }
            self.ready = ReadyQueue::Mlfq(rebuilt);
        }
    }

    /// Sets the per-dispatch work budget of one level, coerced to at least one unit. Levels
    /// outside the representable range are ignored.
    pub fn set_level_quantum(&mut self, level: usize, units: i32) {
        if level < MAX_LEVELS {
            self.quantum_by_level[level] = units.max(1);
        }
    }

    /// Turns the periodic aging step on or off.
    pub fn set_aging(&mut self, enabled: bool) {
        self.enable_aging = enabled;
    }

    /// Sets the aging period, coerced to at least one millisecond.
    pub fn set_aging_interval_ms(&mut self, ms: u64) {
        self.aging_interval_ms = ms.max(1);
    }

    /// Re-anchors the aging timer, so the first aging step happens one full interval after boot.
    pub fn reset_aging(&mut self, now_ms: u64) {
        self.last_age_ms = now_ms;
    }

    /// Makes `tid` eligible to run under the active discipline.
    ///
    /// Round-robin appends; priority inserts before the first queued task of strictly lower base
    /// priority, which keeps FIFO order among equals; MLFQ clamps the task's level, refreshes its
    /// budget to that level's quantum, and appends to the level FIFO.
    pub fn enqueue(&mut self, tasks: &mut TaskTable, tid: TaskId) {
        match &mut self.ready {
            ReadyQueue::RoundRobin(fifo) => fifo.push_back(tid),
            ReadyQueue::Priority(order) => {
                let incoming: i32 = match tasks.get(tid) {
                    Some(task) => task.base_priority(),
                    None => return,
                };
                let position: Option<usize> = order.iter().position(|&queued: &TaskId| match tasks.get(queued) {
                    Some(task) => task.base_priority() < incoming,
                    None => false,
                });
                match position {
                    Some(index) => order.insert(index, tid),
                    None => order.push_back(tid),
                }
            },
            ReadyQueue::Mlfq(queues) => {
                let Some(task) = tasks.get_mut(tid) else { return };
                task.mlfq_level = task.mlfq_level.min(self.levels - 1);
                task.quantum_budget = self.quantum_by_level[task.mlfq_level];
                queues[task.mlfq_level].push_back(tid);
            },
        }
    }

    /// Takes the next task to dispatch: the head of the single FIFO, or under MLFQ the head of
    /// the first non-empty level scanning from 0 upward.
    pub fn pop(&mut self) -> Option<TaskId> {
        match &mut self.ready {
            ReadyQueue::RoundRobin(fifo) => fifo.pop_front(),
            ReadyQueue::Priority(order) => order.pop_front(),
            ReadyQueue::Mlfq(queues) => queues.iter_mut().find_map(|queue: &mut VecDeque<TaskId>| queue.pop_front()),
        }
    }

    /// True when no task is eligible to run.
    pub fn is_empty(&self) -> bool {
        match &self.ready {
            ReadyQueue::RoundRobin(fifo) => fifo.is_empty(),
            ReadyQueue::Priority(order) => order.is_empty(),
            ReadyQueue::Mlfq(queues) => queues.iter().all(|queue: &VecDeque<TaskId>| queue.is_empty()),
        }
    }

    /// Quantum accounting on dispatch. MLFQ grants the level's full quantum on every dispatch;
    /// the other disciplines only restore a budget that has run non-positive.
    pub fn on_dispatch(&mut self, tasks: &mut TaskTable, tid: TaskId) {
        let Some(task) = tasks.get_mut(tid) else { return };
        if self.policy == Policy::Mlfq {
            task.quantum_budget = self.quantum_by_level[task.mlfq_level.min(self.levels - 1)];
        } else if task.quantum_budget <= 0 {
            task.quantum_budget = DEFAULT_QUANTUM;
        }
    }

    /// Moves a CPU-bound task one level down, saturating at the bottom, and grants the new
    /// level's quantum. No effect outside MLFQ.
    pub fn demote(&mut self, tasks: &mut TaskTable, tid: TaskId) {
        if self.policy != Policy::Mlfq {
            return;
        }
        let Some(task) = tasks.get_mut(tid) else { return };
        task.mlfq_level = (task.mlfq_level + 1).min(self.levels - 1);
        task.quantum_budget = self.quantum_by_level[task.mlfq_level];
    }

    /// Moves an I/O-bound task one level up, saturating at the top, and grants the new level's
    /// quantum. Invoked on sleep and wait. No effect outside MLFQ.
    pub fn promote(&mut self, tasks: &mut TaskTable, tid: TaskId) {
        if self.policy != Policy::Mlfq {
            return;
        }
        let Some(task) = tasks.get_mut(tid) else { return };
        task.mlfq_level = task.mlfq_level.saturating_sub(1);
        task.quantum_budget = self.quantum_by_level[task.mlfq_level];
    }

    /// Periodic anti-starvation step. Once per interval, the head of the lowest non-empty level
    /// above 0 moves one level up; the promoted task id is returned so the run loop can log it.
    pub fn maybe_age(&mut self, tasks: &mut TaskTable, now_ms: u64) -> Option<TaskId> {
        if self.policy != Policy::Mlfq || !self.enable_aging {
            return None;
        }
        if now_ms.saturating_sub(self.last_age_ms) < self.aging_interval_ms {
            return None;
        }
        self.last_age_ms = now_ms;

        let quantum_by_level: &ArrayVec<i32, MAX_LEVELS> = &self.quantum_by_level;
        let ReadyQueue::Mlfq(queues) = &mut self.ready else { return None };
        for level in (1..queues.len()).rev() {
            if let Some(tid) = queues[level].pop_front() {
                if let Some(task) = tasks.get_mut(tid) {
                    task.mlfq_level = level - 1;
                    task.quantum_budget = quantum_by_level[level - 1];
                }
                queues[level - 1].push_back(tid);
                return Some(tid);
            }
        }
        None
    }

    /// Builds an empty ready structure for `policy`.
    fn make_ready(policy: Policy, levels: usize) -> ReadyQueue {
        match policy {
            Policy::RoundRobin => ReadyQueue::RoundRobin(VecDeque::new()),
            Policy::Priority => ReadyQueue::Priority(VecDeque::new()),
            Policy::Mlfq => ReadyQueue::Mlfq((0..levels).map(|_| VecDeque::new()).collect()),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for Scheduler
impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Scheduler,
        DEFAULT_QUANTUM,
        MAX_LEVELS,
    };
    use crate::{
        runtime::task::{
            TaskId,
            TaskTable,
        },
        scheduler::policy::Policy,
    };
    use ::anyhow::Result;

    /// Spawns `count` no-op tasks with the given priorities.
    fn table_with_priorities(priorities: &[i32]) -> (TaskTable, Vec<TaskId>) {
        let mut tasks: TaskTable = TaskTable::default();
        let tids: Vec<TaskId> = priorities
            .iter()
            .map(|&priority: &i32| tasks.create(Box::new(|| {}), "task", priority))
            .collect();
        (tasks, tids)
    }

    /// Tests strict FIFO rotation under round-robin.
    #[test]
    fn round_robin_pops_in_enqueue_order() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1, 1, 1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::RoundRobin);

        for &tid in &tids {
            scheduler.enqueue(&mut tasks, tid);
        }
        crate::ensure_eq!(scheduler.pop(), Some(tids[0]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[1]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[2]));
        crate::ensure_eq!(scheduler.pop(), None);
        Ok(())
    }

    /// Tests that priority insertion orders by base priority while keeping FIFO order among
    /// equals.
    #[test]
    fn priority_orders_by_base_priority_fifo_among_equals() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[2, 9, 5, 5, 9]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Priority);

        for &tid in &tids {
            scheduler.enqueue(&mut tasks, tid);
        }
        // Highest first; the two nines and the two fives keep their arrival order.
        crate::ensure_eq!(scheduler.pop(), Some(tids[1]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[4]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[2]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[3]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[0]));
        Ok(())
    }

    /// Tests that MLFQ pops scan levels from 0 upward and that enqueue refreshes the budget from
    /// the level quantum.
    #[test]
    fn mlfq_pops_highest_level_first() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1, 1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Mlfq);

        tasks.get_mut(tids[0]).expect("created above").mlfq_level = 2;
        scheduler.enqueue(&mut tasks, tids[0]);
        scheduler.enqueue(&mut tasks, tids[1]);

        crate::ensure_eq!(scheduler.pop(), Some(tids[1]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[0]));
        crate::ensure_eq!(tasks.get(tids[0]).expect("created above").quantum_budget, 2);
        crate::ensure_eq!(tasks.get(tids[1]).expect("created above").quantum_budget, 8);
        Ok(())
    }

    /// Tests that demotion saturates at the bottom level and promotion at level 0, refreshing the
    /// budget each time.
    #[test]
    fn demote_and_promote_saturate() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Mlfq);
        let tid: TaskId = tids[0];

        scheduler.demote(&mut tasks, tid);
        scheduler.demote(&mut tasks, tid);
        scheduler.demote(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").mlfq_level(), 2);
        crate::ensure_eq!(tasks.get(tid).expect("created above").quantum_budget, 2);

        scheduler.promote(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").mlfq_level(), 1);
        crate::ensure_eq!(tasks.get(tid).expect("created above").quantum_budget, 4);

        scheduler.promote(&mut tasks, tid);
        scheduler.promote(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").mlfq_level(), 0);
        Ok(())
    }

    /// Tests that demotion and promotion are inert outside MLFQ.
    #[test]
    fn feedback_is_inert_outside_mlfq() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::RoundRobin);

        scheduler.demote(&mut tasks, tids[0]);
        scheduler.promote(&mut tasks, tids[0]);
        crate::ensure_eq!(tasks.get(tids[0]).expect("created above").mlfq_level(), 0);
        Ok(())
    }

    /// Tests that one aging step promotes exactly one task, from the lowest non-empty level,
    /// and only after the interval has elapsed.
    #[test]
    fn aging_promotes_one_task_per_interval() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1, 1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Mlfq);
        scheduler.set_aging_interval_ms(50);
        scheduler.reset_aging(0);

        tasks.get_mut(tids[0]).expect("created above").mlfq_level = 2;
        tasks.get_mut(tids[1]).expect("created above").mlfq_level = 2;
        scheduler.enqueue(&mut tasks, tids[0]);
        scheduler.enqueue(&mut tasks, tids[1]);

        // Too early.
        crate::ensure_eq!(scheduler.maybe_age(&mut tasks, 49), None);

        // One task promoted, head of the lowest non-empty level.
        crate::ensure_eq!(scheduler.maybe_age(&mut tasks, 50), Some(tids[0]));
        crate::ensure_eq!(tasks.get(tids[0]).expect("created above").mlfq_level(), 1);
        crate::ensure_eq!(tasks.get(tids[1]).expect("created above").mlfq_level(), 2);

        // The timer re-arms from the last step.
        crate::ensure_eq!(scheduler.maybe_age(&mut tasks, 99), None);
        crate::ensure_eq!(scheduler.maybe_age(&mut tasks, 100), Some(tids[1]));
        Ok(())
    }

    /// Tests that aging never promotes out of level 0.
    #[test]
    fn aging_skips_level_zero() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Mlfq);
        scheduler.set_aging_interval_ms(1);
        scheduler.reset_aging(0);

        scheduler.enqueue(&mut tasks, tids[0]);
        crate::ensure_eq!(scheduler.maybe_age(&mut tasks, 10), None);
        crate::ensure_eq!(tasks.get(tids[0]).expect("created above").mlfq_level(), 0);
        Ok(())
    }

    /// Tests the dispatch-time budget rules: MLFQ always grants the level quantum, the other
    /// disciplines only restore an exhausted budget.
    #[test]
    fn dispatch_refreshes_budgets() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1]);
        let tid: TaskId = tids[0];

        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::RoundRobin);
        tasks.get_mut(tid).expect("created above").quantum_budget = 3;
        scheduler.on_dispatch(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").quantum_budget, 3);

        tasks.get_mut(tid).expect("created above").quantum_budget = -1;
        scheduler.on_dispatch(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").quantum_budget, DEFAULT_QUANTUM);

        scheduler.set_policy(Policy::Mlfq);
        tasks.get_mut(tid).expect("created above").mlfq_level = 1;
        tasks.get_mut(tid).expect("created above").quantum_budget = 1;
        scheduler.on_dispatch(&mut tasks, tid);
        crate::ensure_eq!(tasks.get(tid).expect("created above").quantum_budget, 4);
        Ok(())
    }

    /// Tests level-count clamping and the per-level quantum floor.
    #[test]
    fn configuration_is_clamped() -> Result<()> {
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_levels(0);
        crate::ensure_eq!(scheduler.levels(), 1);
        scheduler.set_levels(9);
        crate::ensure_eq!(scheduler.levels(), MAX_LEVELS);

        let (mut tasks, tids) = table_with_priorities(&[1]);
        scheduler.set_policy(Policy::Mlfq);
        scheduler.set_level_quantum(0, 0);
        scheduler.enqueue(&mut tasks, tids[0]);
        crate::ensure_eq!(tasks.get(tids[0]).expect("created above").quantum_budget, 1);
        Ok(())
    }

    /// Tests that shrinking the level count drains removed levels into the new bottom level.
    #[test]
    fn shrinking_levels_preserves_queued_tasks() -> Result<()> {
        let (mut tasks, tids) = table_with_priorities(&[1, 1, 1]);
        let mut scheduler: Scheduler = Scheduler::new();
        scheduler.set_policy(Policy::Mlfq);

        tasks.get_mut(tids[0]).expect("created above").mlfq_level = 0;
        tasks.get_mut(tids[1]).expect("created above").mlfq_level = 1;
        tasks.get_mut(tids[2]).expect("created above").mlfq_level = 2;
        for &tid in &tids {
            scheduler.enqueue(&mut tasks, tid);
        }

        scheduler.set_levels(2);
        crate::ensure_eq!(scheduler.pop(), Some(tids[0]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[1]));
        crate::ensure_eq!(scheduler.pop(), Some(tids[2]));
        crate::ensure_eq!(scheduler.pop(), None);
        Ok(())
    }
}
