// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Behavior of the ambient API surface: task-local storage, mid-run spawning, the no-op rules
//! outside of a running schedule, and the CSV sink.

use ::anyhow::Result;
use ::fiberos::{
    EventKind,
    EventRecord,
    Policy,
    SharedRuntime,
    TaskState,
};
use ::std::{
    cell::Cell,
    env,
    fs,
    path::PathBuf,
    rc::Rc,
};

/// Task-local storage round-trips machine-word values within the owning task.
#[test]
fn tls_round_trips_within_a_task() -> Result<()> {
    let mut rt: SharedRuntime = SharedRuntime::new();
    rt.set_trace_path(None);
    rt.set_policy(Policy::RoundRobin);

    let observed: Rc<Cell<isize>> = Rc::new(Cell::new(0));
    let sink: Rc<Cell<isize>> = observed.clone();
    rt.spawn(
        move || {
            fiberos::tls_set("cursor", 41);
            fiberos::tls_set("cursor", 42);
            sink.set(fiberos::tls_get("cursor").unwrap_or(-1));
        },
        "keeper",
        1,
    );
    rt.run();

    fiberos::ensure_eq!(observed.get(), 42);
    Ok(())
}

/// A task created from inside a running task is admitted by the loop and runs to completion.
#[test]
fn tasks_can_spawn_tasks() -> Result<()> {
    let mut rt: SharedRuntime = SharedRuntime::new();
    rt.set_trace_path(None);
    rt.set_policy(Policy::RoundRobin);

    rt.spawn(
        || {
            fiberos::spawn(
                || {
                    fiberos::work(1);
                },
                "child",
                1,
            );
            fiberos::yield_now();
        },
        "parent",
        1,
    );
    rt.run();

    let events: Vec<EventRecord> = rt.events();
    let finishes: Vec<i64> = events
        .iter()
        .filter(|event: &&EventRecord| event.kind == EventKind::Finish)
        .map(|event: &EventRecord| event.tid)
        .collect();
    fiberos::ensure_eq!(finishes.len(), 2);
    Ok(())
}

/// Outside of `run()` the ambient API is inert: no runtime, no effect.
#[test]
fn ambient_api_is_inert_outside_run() -> Result<()> {
    fiberos::yield_now();
    fiberos::signal("anything");
    fiberos::tls_set("key", 1);
    fiberos::ensure_eq!(fiberos::tls_get("key"), None);
    fiberos::ensure_eq!(fiberos::work(5), 0);
    fiberos::ensure_eq!(fiberos::spawn(|| {}, "orphan", 1).is_none(), true);
    Ok(())
}

/// A runtime with no tasks boots and halts immediately.
#[test]
fn empty_runtime_halts() -> Result<()> {
    let mut rt: SharedRuntime = SharedRuntime::new();
    rt.set_trace_path(None);
    rt.set_policy(Policy::RoundRobin);
    rt.run();

    let kinds: Vec<EventKind> = rt.events().iter().map(|event: &EventRecord| event.kind).collect();
    fiberos::ensure_eq!(kinds, vec![EventKind::Boot, EventKind::Halt]);
    Ok(())
}

/// The CSV sink carries the conventional header and one line per event.
#[test]
fn csv_sink_matches_the_event_stream() -> Result<()> {
    let path: PathBuf = env::temp_dir().join("fiberos_api_csv_test.csv");
    let mut rt: SharedRuntime = SharedRuntime::new();
    rt.set_trace_path(Some(path.clone()));
    rt.set_policy(Policy::RoundRobin);
    rt.spawn(
        || {
            fiberos::yield_now();
        },
        "scribe",
        1,
    );
    rt.run();

    let contents: String = fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.lines().collect();
    fiberos::ensure_eq!(lines[0], "t_us,event,tid,info");
    fiberos::ensure_eq!(lines.len(), rt.events().len() + 1);
    fiberos::ensure_eq!(lines[1].contains(",boot,-1,rr"), true);
    fiberos::ensure_eq!(lines.last().expect("trace is non-empty").contains(",halt,-1,"), true);
    fs::remove_file(&path)?;
    Ok(())
}

/// `work` without a quantum crossing does not suspend; crossing zero reports the overdraft.
#[test]
fn work_reports_remaining_budget() -> Result<()> {
    let mut rt: SharedRuntime = SharedRuntime::new();
    rt.set_trace_path(None);
    rt.set_policy(Policy::RoundRobin);

    let observed: Rc<Cell<i32>> = Rc::new(Cell::new(0));
    let sink: Rc<Cell<i32>> = observed.clone();
    rt.spawn(
        move || {
            // Fresh budget of 8: spending 3 leaves 5, spending 10 more overdraws to -5.
            let after_three: i32 = fiberos::work(3);
            let after_ten: i32 = fiberos::work(10);
            sink.set(after_three * 100 + after_ten);
        },
        "spender",
        1,
    );
    rt.run();

    fiberos::ensure_eq!(observed.get(), 5 * 100 + (-5));
    let qexpires: usize = rt
        .events()
        .iter()
        .filter(|event: &&EventRecord| event.kind == EventKind::Qexpire)
        .count();
    fiberos::ensure_eq!(qexpires, 1);
    fiberos::ensure_eq!(rt.task_state(fiberos::TaskId::from(0)), Some(TaskState::Finished));
    Ok(())
}
