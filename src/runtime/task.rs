// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Task records and the task table.
//!
//! Tasks are identified by dense, monotonically assigned [TaskId]s; every other part of the
//! runtime (ready structures, the resource wait registry, the trace) refers to tasks by id only,
//! so records can live in a plain vector indexed by id.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::context::TaskContext,
    scheduler::scheduler::DEFAULT_QUANTUM,
};
use ::std::collections::HashMap;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Lowest admissible base priority.
pub const PRIORITY_MIN: i32 = 1;
/// Highest admissible base priority.
pub const PRIORITY_MAX: i32 = 10;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier. Assigned monotonically from 0 at creation and stable for
/// the life of the task.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct TaskId(pub usize);

/// Lifecycle states of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    /// Created, not yet admitted by the run loop.
    New,
    /// Eligible to run; present in exactly one ready-structure slot.
    Ready,
    /// Currently executing on the host thread.
    Running,
    /// Parked in exactly one resource wait queue.
    Blocked,
    /// Waiting for a wake deadline; present in no queue.
    Sleeping,
    /// Terminal. A finished task never re-enters any queue.
    Finished,
}

/// A cooperatively scheduled unit of execution with its own stack.
pub struct Task {
    /// Identifier; equals the record's index in the task table.
    pub(crate) tid: TaskId,
    /// Human label for diagnostics.
    pub(crate) name: String,
    /// Static priority in [PRIORITY_MIN, PRIORITY_MAX]. Never mutated after creation.
    pub(crate) base_priority: i32,
    /// Lifecycle state.
    pub(crate) state: TaskState,
    /// Entry function, invoked once by the trampoline when the task first runs.
    pub(crate) entry: Option<Box<dyn FnOnce()>>,
    /// Execution context, built lazily on first dispatch.
    pub(crate) context: Option<TaskContext>,
    /// Wake deadline in milliseconds since boot. Meaningful only while SLEEPING.
    pub(crate) wake_time_ms: u64,
    /// Work units remaining before forced yield.
    pub(crate) quantum_budget: i32,
    /// Feedback-queue level; 0 is highest. Meaningful only under MLFQ.
    pub(crate) mlfq_level: usize,
    /// Task-local storage: machine-word values keyed by name.
    pub(crate) locals: HashMap<String, isize>,
}

/// Storage of task records, keyed by dense task id.
#[derive(Default)]
pub struct TaskTable {
    /// Records, indexed by tid.
    tasks: Vec<Task>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for TaskTable
impl TaskTable {
    /// Allocates a task record in the NEW state and returns its id. The task does not run until
    /// the run loop admits and dispatches it.
    pub fn create(&mut self, entry: Box<dyn FnOnce()>, name: &str, priority: i32) -> TaskId {
        let tid: TaskId = TaskId(self.tasks.len());
        let task: Task = Task {
            tid,
            name: name.to_string(),
            base_priority: priority.clamp(PRIORITY_MIN, PRIORITY_MAX),
            state: TaskState::New,
            entry: Some(entry),
            context: None,
            wake_time_ms: 0,
            quantum_budget: DEFAULT_QUANTUM,
            mlfq_level: 0,
            locals: HashMap::new(),
        };
        trace!("create(): tid={:?}, name={:?}, priority={:?}", tid, name, task.base_priority);
        self.tasks.push(task);
        tid
    }

    /// Looks up a task record.
    pub fn get(&self, tid: TaskId) -> Option<&Task> {
        self.tasks.get(tid.0)
    }

    /// Looks up a task record for mutation.
    pub fn get_mut(&mut self, tid: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(tid.0)
    }

    /// Number of records ever created.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if no tasks were ever created.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True once every created task has reached the terminal state.
    pub fn all_finished(&self) -> bool {
        self.tasks.iter().all(|task: &Task| task.state == TaskState::Finished)
    }
}

/// Associate Functions for Task
impl Task {
    /// Human label of this task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Static priority.
    pub fn base_priority(&self) -> i32 {
        self.base_priority
    }

    /// Current feedback-queue level.
    pub fn mlfq_level(&self) -> usize {
        self.mlfq_level
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for TaskId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<TaskId> for usize {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
