//! Prompt log port (spec §6): `<sandbox_root>/<project_id>/prompts.log.jsonl`,
//! one JSON object per line. Same append-only contract as `audit.rs`.

use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::LogError;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptLogType {
    Prompt,
    FixPrompt,
    ClarificationPrompt,
    Response,
    HelperAgentResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptLogEntry {
    pub task_id: String,
    pub iteration: u64,
    #[serde(rename = "type")]
    pub entry_type: PromptLogType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

pub struct PromptLog {
    path: PathBuf,
}

impl PromptLog {
    pub fn new(sandbox_root: &Path, project_id: &str) -> Self {
        PromptLog {
            path: sandbox_root.join(project_id).join("prompts.log.jsonl"),
        }
    }

    pub fn append(&self, entry: &PromptLogEntry) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry).expect("PromptLogEntry always serializes");
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_writes_jsonl_entry() {
        let dir = tempdir().unwrap();
        let log = PromptLog::new(dir.path(), "proj");
        log.append(&PromptLogEntry {
            task_id: "t-1".into(),
            iteration: 3,
            entry_type: PromptLogType::FixPrompt,
            content: "fix the thing".into(),
            metadata: None,
        })
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("proj/prompts.log.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("FIX_PROMPT"));
    }
}
