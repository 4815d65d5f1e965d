// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::env;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Name of the environment variable that selects a scheduling discipline.
pub const POLICY_ENV_VAR: &str = "SCHED";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduling disciplines.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Policy {
    /// Single FIFO, strict rotation.
    RoundRobin,
    /// Static priority with FIFO order among equals. No preemption of the running task.
    Priority,
    /// Multi-level feedback queue: demote on quantum expiry, promote on I/O hints, age upward.
    Mlfq,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Policy
impl Policy {
    /// Short name of this policy, as recorded in the boot event.
    pub fn name(&self) -> &'static str {
        match self {
            Policy::RoundRobin => "rr",
            Policy::Priority => "prio",
            Policy::Mlfq => "mlfq",
        }
    }

    /// Parses a policy name. Unrecognized names are caller misuse and map to None rather than an
    /// error, so the scheduler can fall back to its default.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rr" => Some(Policy::RoundRobin),
            "prio" | "priority" => Some(Policy::Priority),
            "mlfq" => Some(Policy::Mlfq),
            _ => None,
        }
    }

    /// Reads the policy selected through the environment, if any.
    pub fn from_env() -> Option<Self> {
        match env::var(POLICY_ENV_VAR) {
            Ok(name) => Policy::parse(&name),
            Err(_) => None,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for Policy
impl Default for Policy {
    fn default() -> Self {
        Policy::RoundRobin
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
