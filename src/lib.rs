// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! fiberos: a user-space cooperative threading runtime with pluggable schedulers.
//!
//! Lightweight tasks ("fibers") run on a single operating-system thread and switch cooperatively
//! at well-defined suspension points, under one of three disciplines: round-robin, static
//! priority, or a multi-level feedback queue with aging. Every scheduling decision is appended
//! to a machine-readable trace, which makes the runtime a convenient bench for studying
//! scheduler behavior.
//!
//! ```no_run
//! use fiberos::{
//!     Policy,
//!     SharedRuntime,
//! };
//!
//! let mut rt: SharedRuntime = SharedRuntime::new();
//! rt.set_policy(Policy::RoundRobin);
//! rt.spawn(
//!     || {
//!         fiberos::work(1);
//!         fiberos::yield_now();
//!     },
//!     "worker",
//!     5,
//! );
//! rt.run();
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod runtime;
pub mod scheduler;

pub use crate::{
    config::Config,
    runtime::{
        fail::Fail,
        sleep_ms,
        signal,
        spawn,
        task::{
            TaskId,
            TaskState,
        },
        tls_get,
        tls_set,
        trace::{
            EventKind,
            EventRecord,
        },
        wait,
        work,
        yield_now,
        Runtime,
        SharedRuntime,
    },
    scheduler::Policy,
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the enclosing function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        if left != right {
            ::anyhow::bail!("ensure_eq failed: {:?} != {:?}", left, right);
        }
    }};
}

/// Ensures that two expressions differ, bailing out of the enclosing function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        if left == right {
            ::anyhow::bail!("ensure_neq failed: {:?} == {:?}", left, right);
        }
    }};
}
