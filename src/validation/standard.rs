//! StandardValidator (spec §4.6.1).
//!
//! Parses the agent's terminating JSON object, sanitizes any file paths it
//! names, and evaluates each acceptance criterion against the sandbox. The
//! extraction logic is `find`-based, tolerant of one surrounding fence, no
//! general-purpose recursive-descent parser needed.

use crate::state::{Confidence, Task, ValidationReport};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Extracts the outermost `{...}` JSON object from agent output, tolerating
/// a single surrounding ```json fence. Returns `None` if no balanced object
/// parses as valid JSON.
pub fn extract_outermost_json(text: &str) -> Option<serde_json::Value> {
    let unfenced = strip_one_code_fence(text);
    let start = unfenced.find('{')?;
    let bytes = unfenced.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end?;
    serde_json::from_str(&unfenced[start..=end]).ok()
}

fn strip_one_code_fence(text: &str) -> &str {
    let trimmed = text.trim_end();
    if let Some(rest) = trimmed.rfind("```") {
        if let Some(fence_start) = trimmed[..rest].rfind("```") {
            return &trimmed[fence_start..rest];
        }
    }
    text
}

/// Sanitizes a path named in agent output: non-absolute, free of `..`
/// components, and must exist under `sandbox_root`. Returns `None` if any
/// check fails (the path is filtered, per spec §4.6.1).
fn sanitize_path(raw: &str, sandbox_root: &Path) -> Option<PathBuf> {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return None;
    }
    if candidate.components().any(|c| c == std::path::Component::ParentDir) {
        return None;
    }
    let joined = sandbox_root.join(candidate);
    if joined.exists() {
        Some(joined)
    } else {
        None
    }
}

enum CriterionKind<'a> {
    FileExists(&'a str),
    Grep(&'a str),
    JsonKeyPresent(&'a str),
    TestCommand,
    Behavioral,
}

fn criterion_re_file() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)file\s+([^\s]+)\s+exists").unwrap())
}

fn criterion_re_grep() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)contains\s+text\s+["']?([^"'\n]+)["']?"#).unwrap())
}

fn criterion_re_json_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)json\s+key\s+([A-Za-z0-9_.]+)\s+present").unwrap())
}

fn classify(criterion: &str) -> CriterionKind<'_> {
    if let Some(caps) = criterion_re_file().captures(criterion) {
        return CriterionKind::FileExists(caps.get(1).unwrap().as_str());
    }
    if let Some(caps) = criterion_re_grep().captures(criterion) {
        return CriterionKind::Grep(caps.get(1).unwrap().as_str());
    }
    if let Some(caps) = criterion_re_json_key().captures(criterion) {
        return CriterionKind::JsonKeyPresent(caps.get(1).unwrap().as_str());
    }
    if criterion.to_lowercase().contains("tests pass") {
        return CriterionKind::TestCommand;
    }
    CriterionKind::Behavioral
}

pub fn validate(task: &Task, raw_output: &str, sandbox_root: &Path) -> ValidationReport {
    let json = extract_outermost_json(raw_output);
    let files_created = json
        .as_ref()
        .and_then(|v| v.get("files_created"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    let files_updated = json
        .as_ref()
        .and_then(|v| v.get("files_updated"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    let named_files: Vec<&str> = files_created.into_iter().chain(files_updated).collect();
    let sanitized_files: Vec<PathBuf> = named_files
        .iter()
        .filter_map(|f| sanitize_path(f, sandbox_root))
        .collect();

    let mut rules_passed = Vec::new();
    let mut rules_failed = Vec::new();
    let mut failed_criteria = Vec::new();
    let mut uncertain_criteria = Vec::new();

    for criterion in &task.acceptance_criteria {
        let passed = match classify(criterion) {
            CriterionKind::FileExists(path) => sandbox_root.join(path).exists()
                || sanitized_files.iter().any(|p| p.ends_with(path)),
            CriterionKind::Grep(needle) => sanitized_files
                .iter()
                .chain(std::iter::once(&sandbox_root.to_path_buf()).filter(|_| false))
                .any(|f| file_contains(f, needle))
                || raw_output.contains(needle),
            CriterionKind::JsonKeyPresent(key) => json
                .as_ref()
                .map(|v| v.get(key).is_some())
                .unwrap_or(false),
            CriterionKind::TestCommand => match &task.test_command {
                Some(cmd) => run_test_command(cmd, sandbox_root),
                None => false,
            },
            CriterionKind::Behavioral => {
                uncertain_criteria.push(criterion.clone());
                continue;
            }
        };

        if passed {
            rules_passed.push(criterion.clone());
        } else {
            rules_failed.push(criterion.clone());
            failed_criteria.push(criterion.clone());
        }
    }

    let status_ok = json
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(|v| v.as_str())
        .map(|s| s == "completed")
        .unwrap_or(false);

    let valid = status_ok && failed_criteria.is_empty() && uncertain_criteria.is_empty();
    let confidence = if !uncertain_criteria.is_empty() {
        Confidence::Uncertain
    } else if valid {
        Confidence::High
    } else {
        Confidence::Low
    };

    ValidationReport {
        valid,
        confidence,
        rules_passed,
        rules_failed,
        failed_criteria,
        uncertain_criteria,
        reason: None,
    }
}

fn file_contains(path: &Path, needle: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.contains(needle))
        .unwrap_or(false)
}

fn run_test_command(cmd: &str, cwd: &Path) -> bool {
    let Some(mut parts) = shlex::split(cmd) else {
        return false;
    };
    if parts.is_empty() {
        return false;
    }
    let program = parts.remove(0);
    std::process::Command::new(program)
        .args(parts)
        .current_dir(cwd)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
