//! The persisted `SupervisorState` document and its constituent types.
//!
//! All fields round-trip byte-for-byte through `serde_json`: unknown keys are
//! retained in `extra` and re-emitted on serialize, and the flat
//! `retry_count_<id>` / `last_error_<id>` / `repeated_error_count_<id>` /
//! `interrogation_performed_<id>_attempt_<n>` keys the wire format expects are
//! projected to and from the typed `task_counters` map.

mod counters;
mod wire;

pub use counters::TaskCounters;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TaskId = String;
pub type FeatureId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupervisorStatus {
    Running,
    Blocked,
    Halted,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    AskedQuestion,
    Ambiguity,
    Blocked,
    OutputFormatInvalid,
    CursorExecFailure,
    ResourceExhausted,
    ProviderCircuitBroken,
    TaskListExhaustedGoalIncomplete,
    StateMissing,
    StateCorrupt,
    InfrastructureFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Coding,
    Behavioral,
    Testing,
    Configuration,
    Documentation,
    Refactoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "UNCERTAIN")]
    Uncertain,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub intent: String,
    pub task_type: TaskType,
    pub instructions: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_json_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_artifacts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<FeatureId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// The task's final `retry_count` at completion, kept around after
    /// `task_counters` is cleared so the value survives in `completed_tasks`.
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueState {
    #[serde(default)]
    pub exhausted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub provider: String,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub error_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceExhaustedRetry {
    pub attempt: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    pub status: SupervisorStatus,
    pub iteration: u64,
    pub goal: Goal,
    #[serde(default)]
    pub queue: QueueState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Task>,
    #[serde(default)]
    pub completed_tasks: Vec<CompletedTask>,
    #[serde(default)]
    pub blocked_tasks: Vec<BlockedTask>,
    #[serde(default)]
    pub active_sessions: HashMap<FeatureId, ActiveSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_exhausted_retry: Option<ResourceExhaustedRetry>,
    #[serde(default)]
    pub task_counters: HashMap<TaskId, TaskCounters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_details: Option<String>,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,
    pub last_updated: DateTime<Utc>,
    /// Unknown keys preserved verbatim across round-trips.
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Auto
}

impl SupervisorState {
    pub fn to_wire_json(&self) -> anyhow::Result<serde_json::Value> {
        wire::to_wire_json(self)
    }

    pub fn from_wire_json(value: serde_json::Value) -> anyhow::Result<Self> {
        wire::from_wire_json(value)
    }

    /// Exactly one of `current_task` / "none" per the state-document invariant.
    pub fn task_in_flight(&self) -> bool {
        self.current_task.is_some()
    }

    pub fn counters_for(&mut self, task_id: &str) -> &mut TaskCounters {
        self.task_counters
            .entry(task_id.to_string())
            .or_insert_with(TaskCounters::default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence: Confidence,
    #[serde(default)]
    pub rules_passed: Vec<String>,
    #[serde(default)]
    pub rules_failed: Vec<String>,
    #[serde(default)]
    pub failed_criteria: Vec<String>,
    #[serde(default)]
    pub uncertain_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationReport {
    /// Only upgrades are permitted: `valid:false -> true`. Never downgrades.
    pub fn upgrade(&mut self, now_valid: bool) {
        if now_valid {
            self.valid = true;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub usage: Option<Usage>,
}

impl ProviderResult {
    pub fn raw_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    pub fn synthetic_failure() -> Self {
        ProviderResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 1,
            status: Some("FAILED".to_string()),
            session_id: None,
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Complete,
    Retry,
    Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_state() -> SupervisorState {
        SupervisorState {
            status: SupervisorStatus::Running,
            iteration: 0,
            goal: Goal {
                description: "x".into(),
                completed: false,
                project_id: "proj".into(),
            },
            queue: QueueState::default(),
            current_task: None,
            completed_tasks: vec![],
            blocked_tasks: vec![],
            active_sessions: HashMap::new(),
            resource_exhausted_retry: None,
            task_counters: HashMap::new(),
            halt_reason: None,
            halt_details: None,
            execution_mode: ExecutionMode::Auto,
            last_updated: Utc::now(),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn task_in_flight_false_when_no_current_task() {
        assert!(!minimal_state().task_in_flight());
    }

    #[test]
    fn counters_for_creates_entry_on_first_access() {
        let mut state = minimal_state();
        assert!(state.task_counters.is_empty());
        state.counters_for("t-1").retry_count += 1;
        assert_eq!(state.task_counters.get("t-1").unwrap().retry_count, 1);
    }

    #[test]
    fn validation_report_upgrade_never_downgrades() {
        let mut report = ValidationReport {
            valid: true,
            confidence: Confidence::High,
            rules_passed: vec![],
            rules_failed: vec![],
            failed_criteria: vec![],
            uncertain_criteria: vec![],
            reason: None,
        };
        report.upgrade(false);
        assert!(report.valid, "upgrade(false) must never downgrade valid=true");
    }
}
