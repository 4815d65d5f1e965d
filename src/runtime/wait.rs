// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Resource wait registry: named resources, each with a FIFO of blocked tasks.
//!
//! Signals wake exactly one waiter, in arrival order. There is no broadcast and signals are never
//! queued: a signal with no waiter is lost.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::task::TaskId;
use ::std::collections::{
    HashMap,
    VecDeque,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// FIFO of tasks blocked on one named resource.
#[derive(Default)]
pub struct WaitQueue {
    /// Blocked tasks, in arrival order.
    waiters: VecDeque<TaskId>,
}

/// Mapping from resource name to its wait queue. Queues that drain to empty stay in the mapping.
#[derive(Default)]
pub struct WaitTable {
    /// Per-resource queues.
    queues: HashMap<String, WaitQueue>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for WaitQueue
impl WaitQueue {
    /// Parks a task at the tail of this queue.
    pub fn push(&mut self, tid: TaskId) {
        self.waiters.push_back(tid);
    }

    /// Takes the longest-waiting task, if any.
    pub fn pop(&mut self) -> Option<TaskId> {
        self.waiters.pop_front()
    }

    /// True if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Associate Functions for WaitTable
impl WaitTable {
    /// Parks `tid` on `resource`, creating the queue on first use.
    pub fn enqueue(&mut self, resource: &str, tid: TaskId) {
        self.queues.entry(resource.to_string()).or_default().push(tid);
    }

    /// Takes the head waiter of `resource`. Returns None for an absent or drained resource.
    pub fn dequeue(&mut self, resource: &str) -> Option<TaskId> {
        self.queues.get_mut(resource)?.pop()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
