// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Append-only trace of scheduling events.
//!
//! Every state transition and scheduling decision is recorded here, both in memory (queryable
//! after the run) and, when a sink path is configured, as one CSV line per event. The trace is
//! diagnostic only: losing the file never affects scheduling correctness.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::task::TaskId;
use ::std::{
    fs::File,
    io::{
        BufWriter,
        Write,
    },
    path::Path,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Header line of the CSV sink.
const CSV_HEADER: &str = "t_us,event,tid,info";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Kinds of scheduling events.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    Boot,
    Ready,
    Run,
    Start,
    Yield,
    Sleep,
    Wakeup,
    Wait,
    Signal,
    Qexpire,
    Age,
    Finish,
    Halt,
}

/// A single trace record.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// Microseconds since runtime boot, from the monotonic clock.
    pub t_us: u64,
    /// Event kind.
    pub kind: EventKind,
    /// Emitting task, or -1 for runtime-global events.
    pub tid: i64,
    /// Optional detail. Controlled by the runtime, never contains commas.
    pub info: String,
}

/// Event trace: in-memory records plus an optional line-oriented CSV sink.
pub struct EventTrace {
    /// All records, in emission order.
    records: Vec<EventRecord>,
    /// CSV sink, dropped on the first write failure.
    sink: Option<BufWriter<File>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for EventKind
impl EventKind {
    /// The wire name of this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Boot => "boot",
            EventKind::Ready => "ready",
            EventKind::Run => "run",
            EventKind::Start => "start",
            EventKind::Yield => "yield",
            EventKind::Sleep => "sleep",
            EventKind::Wakeup => "wakeup",
            EventKind::Wait => "wait",
            EventKind::Signal => "signal",
            EventKind::Qexpire => "qexpire",
            EventKind::Age => "age",
            EventKind::Finish => "finish",
            EventKind::Halt => "halt",
        }
    }
}

/// Associate Functions for EventTrace
impl EventTrace {
    /// Creates an empty trace with no sink attached.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            sink: None,
        }
    }

    /// Attaches a CSV sink at `path`, truncating any previous file and writing the header line.
    /// Failure to open the sink is logged and otherwise ignored.
    pub fn open_sink(&mut self, path: &Path) {
        match File::create(path) {
            Ok(file) => {
                let mut sink: BufWriter<File> = BufWriter::new(file);
                if let Err(e) = writeln!(sink, "{}", CSV_HEADER) {
                    warn!("open_sink(): cannot write trace header (path={:?} error={:?})", path, e);
                    return;
                }
                self.sink = Some(sink);
            },
            Err(e) => {
                warn!("open_sink(): cannot open trace sink (path={:?} error={:?})", path, e);
            },
        }
    }

    /// Appends one record.
    pub fn record(&mut self, t_us: u64, kind: EventKind, tid: Option<TaskId>, info: &str) {
        let tid: i64 = match tid {
            Some(tid) => usize::from(tid) as i64,
            None => -1,
        };
        if let Some(sink) = &mut self.sink {
            if let Err(e) = writeln!(sink, "{},{},{},{}", t_us, kind.as_str(), tid, info) {
                warn!("record(): trace sink write failed, disabling sink (error={:?})", e);
                self.sink = None;
            }
        }
        self.records.push(EventRecord {
            t_us,
            kind,
            tid,
            info: info.to_string(),
        });
    }

    /// All records emitted so far, in order.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Flushes the sink, if any.
    pub fn flush(&mut self) {
        if let Some(sink) = &mut self.sink {
            if let Err(e) = sink.flush() {
                warn!("flush(): trace sink flush failed (error={:?})", e);
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for EventTrace
impl Default for EventTrace {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
