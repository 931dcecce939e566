//! Typed replacement for the source's flat `retry_count_<id>` style keys.
//!
//! See `wire.rs` for the projection to and from that flat shape, which is
//! what actually crosses the wire per the state document contract.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounters {
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub repeated_error_count: u32,
    /// Attempt numbers for which an interrogation has already run, keyed by
    /// `(task_id, attempt)` at the call site so a crash never re-runs one.
    #[serde(default)]
    pub interrogations_performed: HashSet<u32>,
}

impl TaskCounters {
    pub fn record_error(&mut self, error: &str) {
        if self.last_error.as_deref() == Some(error) {
            self.repeated_error_count += 1;
        } else {
            self.repeated_error_count = 0;
            self.last_error = Some(error.to_string());
        }
    }

    pub fn interrogation_performed(&self, attempt: u32) -> bool {
        self.interrogations_performed.contains(&attempt)
    }

    pub fn mark_interrogation_performed(&mut self, attempt: u32) {
        self.interrogations_performed.insert(attempt);
    }
}
