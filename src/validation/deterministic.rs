//! DeterministicValidator (spec §4.6.2): a cheap, bounded second pass that
//! runs only when `StandardValidator` left a criterion unresolved. Gated by
//! a random sample percentage so it only fires on a configurable slice of
//! failures, keeping the common case fast.

use crate::state::{Confidence, Task};
use rand::Rng;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const MAX_FILES_SCANNED: usize = 50;
const MAX_BYTES_PER_FILE: u64 = 256 * 1024;

/// Catastrophic backtracking guard: reject needles built from user-controlled
/// acceptance-criteria text that look like they'd blow up a regex engine.
fn looks_catastrophic(pattern: &str) -> bool {
    pattern.contains("(.*)+") || pattern.contains("(.+)+") || pattern.matches('*').count() > 8
}

pub fn gate_passes(percent: u8) -> bool {
    if percent >= 100 {
        return true;
    }
    if percent == 0 {
        return false;
    }
    rand::thread_rng().gen_range(0..100) < percent
}

fn re_file_exists() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)file\s+([^\s]+)\s+exists").unwrap())
}

fn re_grep_found() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)contains\s+text\s+["']?([^"'\n]+)["']?"#).unwrap())
}

fn re_json_semver() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)json\s+key\s+([A-Za-z0-9_.]+)\s+is\s+at\s+least\s+([0-9]+(?:\.[0-9]+){0,2})").unwrap()
    })
}

fn re_json_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)json\s+key\s+([A-Za-z0-9_.]+)\s+present").unwrap())
}

/// A rule's check class (spec §4.6.2): `file_exists` / `json_contains`
/// (optionally in `semver` mode) / `grep_found` are high confidence; anything
/// that falls through to a plain case-insensitive substring scan is proxy
/// evidence and can only demote confidence, never upgrade `valid`.
enum Rule<'a> {
    FileExists(&'a str),
    JsonSemver { key: &'a str, at_least: &'a str },
    JsonKeyPresent(&'a str),
    GrepFound(&'a str),
    Proxy,
}

fn classify(criterion: &str) -> Rule<'_> {
    if let Some(caps) = re_json_semver().captures(criterion) {
        return Rule::JsonSemver {
            key: caps.get(1).unwrap().as_str(),
            at_least: caps.get(2).unwrap().as_str(),
        };
    }
    if let Some(caps) = re_json_key().captures(criterion) {
        return Rule::JsonKeyPresent(caps.get(1).unwrap().as_str());
    }
    if let Some(caps) = re_file_exists().captures(criterion) {
        return Rule::FileExists(caps.get(1).unwrap().as_str());
    }
    if let Some(caps) = re_grep_found().captures(criterion) {
        return Rule::GrepFound(caps.get(1).unwrap().as_str());
    }
    Rule::Proxy
}

fn parse_version(raw: &str) -> Vec<u64> {
    raw.split('.').filter_map(|p| p.parse::<u64>().ok()).collect()
}

fn semver_at_least(found: &str, required: &str) -> bool {
    let found = parse_version(found);
    let required = parse_version(required);
    found >= required
}

fn json_lookup(scanned: &[(std::path::PathBuf, String)], key: &str) -> Option<serde_json::Value> {
    scanned.iter().find_map(|(_, text)| {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let mut cur = &value;
        for part in key.split('.') {
            cur = cur.get(part)?;
        }
        Some(cur.clone())
    })
}

fn high_confidence_check_passes(rule: &Rule<'_>, sandbox_root: &Path, scanned: &[(std::path::PathBuf, String)]) -> Option<bool> {
    match rule {
        Rule::FileExists(path) => Some(sandbox_root.join(path).exists()),
        Rule::JsonKeyPresent(key) => Some(json_lookup(scanned, key).is_some()),
        Rule::JsonSemver { key, at_least } => Some(
            json_lookup(scanned, key)
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .map(|found| semver_at_least(&found, at_least))
                .unwrap_or(false),
        ),
        Rule::GrepFound(needle) => Some(scanned.iter().any(|(_, text)| text.contains(needle))),
        Rule::Proxy => None,
    }
}

/// Re-scans the sandbox for evidence of criteria that `StandardValidator`
/// marked uncertain or failed. Upgrades `report.valid` only when every
/// remaining criterion is covered by a high-confidence structured check
/// (`file_exists` / `json_contains` / `grep_found`); a criterion that only
/// turns up under a loose substring scan demotes confidence to `Medium`
/// without ever flipping `valid` (spec §4.6.2). Never downgrades — mirrors
/// `ValidationReport::upgrade`.
pub fn validate(task: &Task, sandbox_root: &Path, report: &mut crate::state::ValidationReport) {
    if report.failed_criteria.is_empty() && report.uncertain_criteria.is_empty() {
        return;
    }

    let scanned = scan_sandbox_text(sandbox_root);
    let mut still_failed = Vec::new();
    let mut covered_by_high = Vec::new();
    let mut saw_proxy_evidence = false;

    for criterion in report.failed_criteria.iter().chain(report.uncertain_criteria.iter()) {
        if looks_catastrophic(criterion) {
            still_failed.push(criterion.clone());
            continue;
        }

        let rule = classify(criterion);
        match high_confidence_check_passes(&rule, sandbox_root, &scanned) {
            Some(true) => covered_by_high.push(criterion.clone()),
            Some(false) => still_failed.push(criterion.clone()),
            None => {
                // Proxy evidence: a loose, case-insensitive substring scan.
                // Can corroborate that *something* relevant happened but can
                // never stand in for a structured check.
                let needle = criterion.to_lowercase();
                if scanned.iter().any(|(_, text)| text.to_lowercase().contains(&needle)) {
                    saw_proxy_evidence = true;
                }
                still_failed.push(criterion.clone());
            }
        }
    }

    if still_failed.is_empty() && !covered_by_high.is_empty() {
        report.rules_passed.append(&mut report.failed_criteria.drain(..).collect());
        report.uncertain_criteria.clear();
        report.confidence = Confidence::High;
        report.upgrade(true);
    } else if saw_proxy_evidence {
        report.confidence = Confidence::Medium;
    }

    let _ = &task.task_id;
}

fn scan_sandbox_text(root: &Path) -> Vec<(std::path::PathBuf, String)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if out.len() >= MAX_FILES_SCANNED {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if out.len() >= MAX_FILES_SCANNED {
                break;
            }
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) != Some(".git") {
                    stack.push(path);
                }
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() > MAX_BYTES_PER_FILE {
                    continue;
                }
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                out.push((path, content));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RetryPolicy, TaskType, ValidationReport};
    use tempfile::tempdir;

    fn task() -> Task {
        Task {
            task_id: "t-1".into(),
            intent: "x".into(),
            task_type: TaskType::Coding,
            instructions: "x".into(),
            acceptance_criteria: vec![],
            tool: None,
            retry_policy: RetryPolicy::default(),
            tests_required: None,
            test_command: None,
            expected_json_schema: None,
            required_artifacts: None,
            feature_id: None,
            meta: None,
        }
    }

    fn report(failed: Vec<&str>) -> ValidationReport {
        ValidationReport {
            valid: false,
            confidence: Confidence::Low,
            rules_passed: vec![],
            rules_failed: failed.iter().map(|s| s.to_string()).collect(),
            failed_criteria: failed.into_iter().map(String::from).collect(),
            uncertain_criteria: vec![],
            reason: None,
        }
    }

    #[test]
    fn gate_always_passes_at_100_percent() {
        assert!(gate_passes(100));
    }

    #[test]
    fn gate_never_passes_at_0_percent() {
        assert!(!gate_passes(0));
    }

    #[test]
    fn high_confidence_file_exists_check_upgrades_report() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();
        let mut r = report(vec!["file a.ts exists"]);
        validate(&task(), dir.path(), &mut r);
        assert!(r.valid);
        assert_eq!(r.confidence, Confidence::High);
        assert!(r.failed_criteria.is_empty());
    }

    #[test]
    fn high_confidence_grep_found_check_upgrades_report() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "retry backoff implemented here").unwrap();
        let mut r = report(vec!["contains text retry backoff implemented"]);
        validate(&task(), dir.path(), &mut r);
        assert!(r.valid);
        assert_eq!(r.confidence, Confidence::High);
    }

    #[test]
    fn high_confidence_json_semver_check_upgrades_report() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pkg.json"), r#"{"version":"2.3.0"}"#).unwrap();
        let mut r = report(vec!["json key version is at least 2.0.0"]);
        validate(&task(), dir.path(), &mut r);
        assert!(r.valid);
    }

    #[test]
    fn proxy_substring_evidence_demotes_confidence_but_never_upgrades() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "the refactor improves readability a lot").unwrap();
        let mut r = report(vec!["the refactor improves readability"]);
        validate(&task(), dir.path(), &mut r);
        assert!(!r.valid, "proxy substring evidence must never flip valid to true");
        assert_eq!(r.confidence, Confidence::Medium);
        assert_eq!(r.failed_criteria.len(), 1);
    }

    #[test]
    fn no_evidence_leaves_report_unchanged() {
        let dir = tempdir().unwrap();
        let mut r = report(vec!["nothing matches this anywhere"]);
        validate(&task(), dir.path(), &mut r);
        assert!(!r.valid);
        assert_eq!(r.failed_criteria.len(), 1);
        assert_eq!(r.confidence, Confidence::Low);
    }

    #[test]
    fn catastrophic_pattern_is_rejected_outright() {
        let dir = tempdir().unwrap();
        let mut r = report(vec!["(.*)+ matches everything"]);
        validate(&task(), dir.path(), &mut r);
        assert!(!r.valid);
    }
}
