// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Configuration file support.
//!
//! A runtime can be configured from a YAML file carrying a `fiberos` section. Every field is
//! optional; absent fields keep their built-in defaults, and out-of-range values go through the
//! same clamping as the programmatic setters.
//!
//! ```yaml
//! fiberos:
//!   policy: mlfq
//!   levels: 3
//!   quantum_by_level: [8, 4, 2]
//!   enable_aging: true
//!   aging_interval_ms: 500
//!   trace_path: schedule_log.csv
//! ```

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::fail::Fail,
    scheduler::Policy,
};
use ::std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Parsed configuration.
#[derive(Debug, Default)]
pub struct Config {
    /// Scheduling discipline.
    pub policy: Option<Policy>,
    /// Number of MLFQ levels.
    pub levels: Option<usize>,
    /// Per-level work budgets, from level 0 downward.
    pub quantum_by_level: Vec<i32>,
    /// Whether MLFQ aging runs.
    pub enable_aging: Option<bool>,
    /// Milliseconds between aging steps.
    pub aging_interval_ms: Option<u64>,
    /// Where the CSV trace is written.
    pub trace_path: Option<PathBuf>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Config
impl Config {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, Fail> {
        let text: String = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses configuration text. Unknown policy names are caller misuse and are ignored, like
    /// every other out-of-range value; only unreadable YAML is an error.
    pub fn parse(text: &str) -> Result<Self, Fail> {
        let docs: Vec<Yaml> = YamlLoader::load_from_str(text)
            .map_err(|e| Fail::new(libc::EINVAL, &format!("malformed configuration: {}", e)))?;
        let root: &Yaml = match docs.first() {
            Some(root) => root,
            None => return Err(Fail::new(libc::EINVAL, "empty configuration")),
        };
        let section: &Yaml = &root["fiberos"];

        let quantum_by_level: Vec<i32> = match section["quantum_by_level"].as_vec() {
            Some(entries) => entries
                .iter()
                .filter_map(Yaml::as_i64)
                .map(|units: i64| units as i32)
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            policy: section["policy"].as_str().and_then(Policy::parse),
            levels: section["levels"].as_i64().map(|levels: i64| levels.max(0) as usize),
            quantum_by_level,
            enable_aging: section["enable_aging"].as_bool(),
            aging_interval_ms: section["aging_interval_ms"].as_i64().map(|ms: i64| ms.max(0) as u64),
            trace_path: section["trace_path"].as_str().map(PathBuf::from),
        })
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
