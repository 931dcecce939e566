//! Audit log port (spec §6): per-project append-only JSONL at
//! `<sandbox_root>/<project_id>/audit.log.jsonl`. "Any crash-safe append-only
//! sink satisfies it" (§9) — this is a plain `OpenOptions::append` writer,
//! chosen over a search-indexed store since journaling for crash-safety,
//! not search, is the actual contract here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LogError;
use crate::state::HaltReason;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    TaskCompleted,
    TaskBlocked,
    Halt,
    GoalCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateDiff {
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub iteration: u64,
    pub event: AuditEvent,
    pub task_id: Option<String>,
    pub tool_invoked: Option<String>,
    pub state_diff: StateDiff,
    pub validation_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    pub prompt_preview: String,
    pub response_preview: String,
    pub prompt_length: usize,
    pub response_length: usize,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// `<sandbox_root>/<project_id>/audit.log.jsonl`.
    pub fn new(sandbox_root: &Path, project_id: &str) -> Self {
        AuditLog {
            path: sandbox_root.join(project_id).join("audit.log.jsonl"),
        }
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry).expect("AuditEntry always serializes");
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Truncates preview text to a fixed byte budget on a char boundary, the
/// same unicode-safe truncation `prompt::truncate_context` performs before
/// embedding file content in a prompt.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn append_writes_one_json_line() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path(), "proj");
        let entry = AuditEntry {
            timestamp: Utc::now(),
            iteration: 1,
            event: AuditEvent::TaskCompleted,
            task_id: Some("t-1".into()),
            tool_invoked: Some("GEMINI".into()),
            state_diff: StateDiff {
                before: Value::Object(serde_json::Map::new()),
                after: Value::Object(serde_json::Map::new()),
            },
            validation_summary: Some("all criteria passed".into()),
            halt_reason: None,
            prompt_preview: "build the thing".into(),
            response_preview: "done".into(),
            prompt_length: 15,
            response_length: 4,
        };
        log.append(&entry).unwrap();
        log.append(&entry).unwrap();

        let content = std::fs::read_to_string(dir.path().join("proj/audit.log.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: HashMap<String, Value> = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "TASK_COMPLETED");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "a".repeat(100);
        let p = preview(&text, 10);
        assert_eq!(p.chars().count(), 13);
    }

    #[test]
    fn preview_leaves_short_text_untouched() {
        assert_eq!(preview("short", 100), "short");
    }
}
