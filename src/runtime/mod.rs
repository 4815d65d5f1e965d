// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The cooperative runtime: task table, scheduler, resource registry, trace, and the run loop
//! that owns the host thread.
//!
//! All runtime state lives in a single [Runtime] value held through [SharedRuntime]. While
//! `run()` is dispatching, a clone of the handle sits in a thread-local ambient slot so the
//! suspension API (`yield_now`, `sleep_ms`, `wait`, `signal`, `work`, ...) can reach the active
//! runtime from inside task entries without threading a handle through every call.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod clock;
pub mod context;
pub mod fail;
pub mod logging;
pub mod task;
pub mod trace;
pub mod wait;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::Config,
    runtime::{
        clock::Clock,
        context::{
            SchedulerContext,
            TaskContext,
        },
        task::{
            Task,
            TaskId,
            TaskState,
            TaskTable,
        },
        trace::{
            EventKind,
            EventRecord,
            EventTrace,
        },
        wait::WaitTable,
    },
    scheduler::{
        Policy,
        Scheduler,
    },
};
use ::std::{
    cell::RefCell,
    ops::{
        Deref,
        DerefMut,
    },
    path::PathBuf,
    rc::Rc,
    thread,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Host-thread nap between run-loop iterations when no task is ready.
const IDLE_NAP: Duration = Duration::from_millis(1);

/// Conventional trace sink location.
const DEFAULT_TRACE_PATH: &str = "schedule_log.csv";

//======================================================================================================================
// Structures
//======================================================================================================================

/// All state of one cooperative runtime.
pub struct Runtime {
    /// Monotonic clock anchored at creation.
    clock: Clock,
    /// Task records, keyed by dense task id.
    tasks: TaskTable,
    /// Active discipline and its ready structure.
    scheduler: Scheduler,
    /// Named resources with FIFOs of blocked tasks.
    resources: WaitTable,
    /// Scheduling event trace.
    trace: EventTrace,
    /// Where the CSV sink is opened at run start. None disables the file sink.
    trace_path: Option<PathBuf>,
    /// The scheduler side of every context switch.
    sched_ctx: SchedulerContext,
    /// Task currently on the host thread. None between dispatches.
    current: Option<TaskId>,
}

/// The SharedObject wraps a value that is aliased across the scheduler and suspended task
/// stacks.
pub struct SharedObject<T>(Rc<T>);

/// Cloneable handle to a [Runtime].
#[derive(Clone)]
pub struct SharedRuntime(SharedObject<Runtime>);

thread_local! {
    /// Ambient runtime slot, populated for the duration of `run()`.
    static CURRENT_RUNTIME: RefCell<Option<SharedRuntime>> = RefCell::new(None);
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Runtime
impl Runtime {
    /// Creates an empty runtime with the default round-robin discipline.
    fn new() -> Self {
        Self {
            clock: Clock::start(),
            tasks: TaskTable::default(),
            scheduler: Scheduler::new(),
            resources: WaitTable::default(),
            trace: EventTrace::new(),
            trace_path: Some(PathBuf::from(DEFAULT_TRACE_PATH)),
            sched_ctx: SchedulerContext::new(),
            current: None,
        }
    }

    /// Allocates a task in the NEW state. The run loop admits it on its next iteration; nothing
    /// runs before `run()`.
    pub fn spawn<F: FnOnce() + 'static>(&mut self, entry: F, name: &str, priority: i32) -> TaskId {
        self.tasks.create(Box::new(entry), name, priority)
    }

    /// Selects the scheduling discipline, overriding the SCHED environment variable.
    pub fn set_policy(&mut self, policy: Policy) {
        self.scheduler.set_policy(policy);
    }

    /// Sets the number of MLFQ levels (clamped to 1..=8).
    pub fn set_mlfq_levels(&mut self, levels: usize) {
        self.scheduler.set_levels(levels);
    }

    /// Sets the per-dispatch work budget of one MLFQ level (coerced to >= 1).
    pub fn set_mlfq_quantum(&mut self, level: usize, units: i32) {
        self.scheduler.set_level_quantum(level, units);
    }

    /// Turns MLFQ aging on or off.
    pub fn set_aging(&mut self, enabled: bool) {
        self.scheduler.set_aging(enabled);
    }

    /// Sets the aging period in milliseconds (coerced to >= 1).
    pub fn set_aging_interval_ms(&mut self, ms: u64) {
        self.scheduler.set_aging_interval_ms(ms);
    }

    /// Chooses where the CSV trace is written, or disables the file sink entirely. In-memory
    /// records are kept either way.
    pub fn set_trace_path(&mut self, path: Option<PathBuf>) {
        self.trace_path = path;
    }

    /// Applies a parsed configuration file.
    pub fn apply_config(&mut self, config: &Config) {
        if let Some(policy) = config.policy {
            self.set_policy(policy);
        }
        if let Some(levels) = config.levels {
            self.set_mlfq_levels(levels);
        }
        for (level, units) in config.quantum_by_level.iter().enumerate() {
            self.set_mlfq_quantum(level, *units);
        }
        if let Some(enabled) = config.enable_aging {
            self.set_aging(enabled);
        }
        if let Some(ms) = config.aging_interval_ms {
            self.set_aging_interval_ms(ms);
        }
        if let Some(path) = &config.trace_path {
            self.trace_path = Some(path.clone());
        }
    }

    /// All trace records emitted so far, in order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.trace.records().to_vec()
    }

    /// Lifecycle state of a task.
    pub fn task_state(&self, tid: TaskId) -> Option<TaskState> {
        self.tasks.get(tid).map(Task::state)
    }

    /// Current MLFQ level of a task.
    pub fn task_level(&self, tid: TaskId) -> Option<usize> {
        self.tasks.get(tid).map(Task::mlfq_level)
    }

    /// Diagnostic name of a task.
    pub fn task_name(&self, tid: TaskId) -> Option<String> {
        self.tasks.get(tid).map(|task: &Task| task.name().to_string())
    }

    /// Appends one trace record stamped with the current clock reading.
    fn record(&mut self, kind: EventKind, tid: Option<TaskId>, info: &str) {
        let t_us: u64 = self.clock.now_us();
        self.trace.record(t_us, kind, tid, info);
    }
}

/// Associate Functions for SharedRuntime
impl SharedRuntime {
    /// Creates a fresh runtime and returns its handle.
    pub fn new() -> Self {
        Self(SharedObject::<Runtime>::new(Runtime::new()))
    }

    /// Creates a runtime configured from a parsed configuration file.
    pub fn from_config(config: &Config) -> Self {
        let mut rt: SharedRuntime = Self::new();
        rt.apply_config(config);
        rt
    }

    /// Drives the schedule to completion. Each iteration admits NEW tasks, wakes expired
    /// sleepers, performs the aging step when due, then pops one task and transfers control to
    /// it. Returns once every task is FINISHED; tasks blocked on a never-signaled resource keep
    /// the loop idling forever.
    pub fn run(&mut self) {
        crate::runtime::logging::initialize();

        {
            let self_: &mut Runtime = &mut *self;
            self_.scheduler.adopt_env_policy();
            if let Some(path) = self_.trace_path.clone() {
                self_.trace.open_sink(&path);
            }
            let boot_ms: u64 = self_.clock.now_ms();
            self_.scheduler.reset_aging(boot_ms);
            let policy: Policy = self_.scheduler.policy();
            info!("run(): booting (policy={})", policy.name());
            self_.record(EventKind::Boot, None, policy.name());
        }

        install(self);
        loop {
            self.admit_new();
            self.wake_sleepers();
            self.age_step();

            match self.scheduler.pop() {
                Some(tid) => self.resume(tid),
                None => {
                    if self.tasks.all_finished() {
                        break;
                    }
                    thread::sleep(IDLE_NAP);
                },
            }
        }
        uninstall();

        let self_: &mut Runtime = &mut *self;
        self_.record(EventKind::Halt, None, "");
        self_.trace.flush();
        info!("run(): halted");
    }

    /// Admits every NEW task in creation order: READY, enqueued, logged.
    fn admit_new(&mut self) {
        let self_: &mut Runtime = &mut *self;
        for index in 0..self_.tasks.len() {
            let tid: TaskId = TaskId::from(index);
            let is_new: bool = matches!(self_.tasks.get(tid).map(Task::state), Some(TaskState::New));
            if is_new {
                if let Some(task) = self_.tasks.get_mut(tid) {
                    task.state = TaskState::Ready;
                }
                self_.scheduler.enqueue(&mut self_.tasks, tid);
                self_.record(EventKind::Ready, Some(tid), "");
            }
        }
    }

    /// Re-admits every sleeper whose deadline has passed.
    fn wake_sleepers(&mut self) {
        let self_: &mut Runtime = &mut *self;
        let now_ms: u64 = self_.clock.now_ms();
        for index in 0..self_.tasks.len() {
            let tid: TaskId = TaskId::from(index);
            let expired: bool = match self_.tasks.get(tid) {
                Some(task) => task.state == TaskState::Sleeping && task.wake_time_ms <= now_ms,
                None => false,
            };
            if expired {
                if let Some(task) = self_.tasks.get_mut(tid) {
                    task.state = TaskState::Ready;
                }
                self_.scheduler.enqueue(&mut self_.tasks, tid);
                self_.record(EventKind::Wakeup, Some(tid), "");
            }
        }
    }

    /// Runs the periodic aging step and logs any promotion it made.
    fn age_step(&mut self) {
        let self_: &mut Runtime = &mut *self;
        let now_ms: u64 = self_.clock.now_ms();
        if let Some(tid) = self_.scheduler.maybe_age(&mut self_.tasks, now_ms) {
            self_.record(EventKind::Age, Some(tid), "promote");
        }
    }

    /// Transfers control to `tid` until its next suspension. Builds the execution context on
    /// first dispatch.
    fn resume(&mut self, tid: TaskId) {
        let self_: &mut Runtime = &mut *self;
        self_.scheduler.on_dispatch(&mut self_.tasks, tid);

        let link: *mut libc::ucontext_t = self_.sched_ctx.as_mut_ptr();
        let Some(task) = self_.tasks.get_mut(tid) else { return };
        if task.context.is_none() {
            task.context = Some(TaskContext::new(link, task_trampoline));
        }
        task.state = TaskState::Running;
        let name: String = task.name.clone();
        let activate: *mut libc::ucontext_t = task.context.as_mut().expect("context built above").as_mut_ptr();

        self_.current = Some(tid);
        self_.record(EventKind::Run, Some(tid), &name);
        crate::runtime::context::switch(link, activate);
        self_.current = None;
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Installs `rt` as the ambient runtime of this thread.
fn install(rt: &SharedRuntime) {
    CURRENT_RUNTIME.with(|slot: &RefCell<Option<SharedRuntime>>| *slot.borrow_mut() = Some(rt.clone()));
}

/// Clears the ambient runtime of this thread.
fn uninstall() {
    CURRENT_RUNTIME.with(|slot: &RefCell<Option<SharedRuntime>>| *slot.borrow_mut() = None);
}

/// The ambient runtime, if one is installed on this thread.
fn ambient() -> Option<SharedRuntime> {
    CURRENT_RUNTIME.with(|slot: &RefCell<Option<SharedRuntime>>| slot.borrow().clone())
}

/// Saves the running task's context and re-activates the scheduler. Returns when the task is
/// next dispatched.
fn yield_to_scheduler(rt: &mut SharedRuntime) {
    let self_: &mut Runtime = &mut *rt;
    let Some(tid) = self_.current else { return };
    let save: *mut libc::ucontext_t = match self_.tasks.get_mut(tid).and_then(|task: &mut Task| task.context.as_mut())
    {
        Some(task_ctx) => task_ctx.as_mut_ptr(),
        None => return,
    };
    let activate: *mut libc::ucontext_t = self_.sched_ctx.as_mut_ptr();
    crate::runtime::context::switch(save, activate);
}

/// First frame of every task context. Marks the task RUNNING, runs its entry exactly once, marks
/// it FINISHED, and unconditionally hands control back to the scheduler. Control never flows past
/// that hand-off: a finished task is never dispatched again.
extern "C" fn task_trampoline() {
    let Some(mut rt) = ambient() else { return };
    let Some(tid) = rt.current else { return };

    let entry: Option<Box<dyn FnOnce()>> = {
        let self_: &mut Runtime = &mut *rt;
        let Some(task) = self_.tasks.get_mut(tid) else { return };
        task.state = TaskState::Running;
        let name: String = task.name.clone();
        let entry: Option<Box<dyn FnOnce()>> = task.entry.take();
        self_.record(EventKind::Start, Some(tid), &name);
        entry
    };

    if let Some(entry) = entry {
        entry();
    }

    {
        let self_: &mut Runtime = &mut *rt;
        if let Some(task) = self_.tasks.get_mut(tid) {
            task.state = TaskState::Finished;
        }
        self_.record(EventKind::Finish, Some(tid), "");
    }
    yield_to_scheduler(&mut rt);
}

/// Creates a task on the ambient runtime. Returns None outside of `run()`.
pub fn spawn<F: FnOnce() + 'static>(entry: F, name: &str, priority: i32) -> Option<TaskId> {
    let mut rt: SharedRuntime = ambient()?;
    Some(rt.spawn(entry, name, priority))
}

/// Cooperatively yields the calling task: READY, re-enqueued under the active discipline, and
/// suspended until its next dispatch. A no-op when no task is running.
pub fn yield_now() {
    let Some(mut rt) = ambient() else { return };
    {
        let self_: &mut Runtime = &mut *rt;
        let Some(tid) = self_.current else { return };
        let is_running: bool = matches!(self_.tasks.get(tid).map(Task::state), Some(TaskState::Running));
        if is_running {
            if let Some(task) = self_.tasks.get_mut(tid) {
                task.state = TaskState::Ready;
            }
            self_.scheduler.enqueue(&mut self_.tasks, tid);
            self_.record(EventKind::Yield, Some(tid), "");
        }
    }
    yield_to_scheduler(&mut rt);
}

/// Puts the calling task to sleep for at least `ms` milliseconds. The task joins no queue; the
/// run loop re-admits it once the deadline passes. Counts as an I/O hint under MLFQ.
pub fn sleep_ms(ms: u64) {
    let Some(mut rt) = ambient() else { return };
    {
        let self_: &mut Runtime = &mut *rt;
        let Some(tid) = self_.current else { return };
        let now_ms: u64 = self_.clock.now_ms();
        let Some(task) = self_.tasks.get_mut(tid) else { return };
        task.wake_time_ms = now_ms + ms;
        task.state = TaskState::Sleeping;
        self_.record(EventKind::Sleep, Some(tid), &ms.to_string());
        self_.scheduler.promote(&mut self_.tasks, tid);
    }
    yield_to_scheduler(&mut rt);
}

/// Blocks the calling task on a named resource until some task signals it. Waiters wake one at a
/// time, in arrival order. Counts as an I/O hint under MLFQ.
pub fn wait(resource: &str) {
    let Some(mut rt) = ambient() else { return };
    {
        let self_: &mut Runtime = &mut *rt;
        let Some(tid) = self_.current else { return };
        let Some(task) = self_.tasks.get_mut(tid) else { return };
        task.state = TaskState::Blocked;
        self_.resources.enqueue(resource, tid);
        self_.record(EventKind::Wait, Some(tid), resource);
        self_.scheduler.promote(&mut self_.tasks, tid);
    }
    yield_to_scheduler(&mut rt);
}

/// Wakes the longest-waiting task blocked on `resource`, if any. The woken task joins the ready
/// structure; it does not preempt the caller. Signals with no waiter are lost.
pub fn signal(resource: &str) {
    let Some(mut rt) = ambient() else { return };
    let self_: &mut Runtime = &mut *rt;
    let Some(tid) = self_.resources.dequeue(resource) else { return };
    let is_blocked: bool = matches!(self_.tasks.get(tid).map(Task::state), Some(TaskState::Blocked));
    if is_blocked {
        if let Some(task) = self_.tasks.get_mut(tid) {
            task.state = TaskState::Ready;
        }
        self_.scheduler.enqueue(&mut self_.tasks, tid);
        self_.record(EventKind::Signal, Some(tid), resource);
    }
}

/// Spends `max(1, units)` work units of the calling task's quantum and returns the remaining
/// budget after the decrement. Crossing zero forces a yield: the expiry is logged, the task is
/// demoted under MLFQ, re-enqueued, and suspended until its next dispatch.
pub fn work(units: i32) -> i32 {
    let Some(mut rt) = ambient() else { return 0 };
    let remaining: i32 = {
        let self_: &mut Runtime = &mut *rt;
        let Some(tid) = self_.current else { return 0 };
        let Some(task) = self_.tasks.get_mut(tid) else { return 0 };
        task.quantum_budget -= units.max(1);
        let remaining: i32 = task.quantum_budget;
        if remaining > 0 {
            return remaining;
        }

        self_.record(EventKind::Qexpire, Some(tid), "auto-yield");
        self_.scheduler.demote(&mut self_.tasks, tid);
        let is_running: bool = matches!(self_.tasks.get(tid).map(Task::state), Some(TaskState::Running));
        if is_running {
            if let Some(task) = self_.tasks.get_mut(tid) {
                task.state = TaskState::Ready;
            }
            self_.scheduler.enqueue(&mut self_.tasks, tid);
        }
        remaining
    };
    yield_to_scheduler(&mut rt);
    remaining
}

/// Stores a machine-word value in the calling task's local storage.
pub fn tls_set(key: &str, value: isize) {
    let Some(mut rt) = ambient() else { return };
    let self_: &mut Runtime = &mut *rt;
    let Some(tid) = self_.current else { return };
    if let Some(task) = self_.tasks.get_mut(tid) {
        task.locals.insert(key.to_string(), value);
    }
}

/// Reads a machine-word value from the calling task's local storage.
pub fn tls_get(key: &str) -> Option<isize> {
    let rt: SharedRuntime = ambient()?;
    let tid: TaskId = rt.current?;
    rt.tasks.get(tid)?.locals.get(key).copied()
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }
}

/// Dereferences a shared object for reading.
impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a shared object for writing. This sidesteps Rust's aliasing discipline on
/// purpose: the scheduler and every suspended task stack hold handles to the same runtime, yet
/// only one of them executes at any instant, so no two mutable dereferences are ever live at the
/// same time. The static borrow checker cannot see that, and the dynamic one would reject
/// borrows held across a context switch, so neither is used.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for SharedRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedRuntime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

/// Default Trait Implementation for SharedRuntime
impl Default for SharedRuntime {
    fn default() -> Self {
        Self::new()
    }
}
