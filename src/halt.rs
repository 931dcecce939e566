//! Halt Detector (spec §4.2): a pure classification of a `ProviderResult`
//! into one `HaltReason` or none. Evaluation order is fixed and total —
//! plain `str::find`/`contains`-based checks rather than a general-purpose
//! parser, since every rule here is a substring or word-boundary check
//! over raw text.

use crate::state::{HaltReason, ProviderResult};
use regex::Regex;
use std::sync::OnceLock;

const AMBIGUITY_WORDS: &[&str] = &["maybe", "could", "suggest", "recommend", "alternative", "option"];

fn ambiguity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = AMBIGUITY_WORDS
            .iter()
            .map(|w| format!(r"\b{w}\b"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?i){pattern}")).expect("ambiguity pattern is valid")
    })
}

/// `requiredKeys` for the terminating JSON object (spec §4.5's Rules Block).
pub const REQUIRED_JSON_KEYS: &[&str] = &[
    "status",
    "files_created",
    "files_updated",
    "changes",
    "neededChanges",
    "summary",
];

pub fn detect(result: &ProviderResult, required_keys: &[&str]) -> Option<HaltReason> {
    let raw = result.raw_output();
    let lower = raw.to_lowercase();

    if lower.contains("resource_exhausted")
        || lower.contains("connecterror")
        || (lower.contains("connect") && lower.contains("exhausted"))
    {
        return Some(HaltReason::ResourceExhausted);
    }

    if result.exit_code != 0 {
        return Some(HaltReason::CursorExecFailure);
    }

    if result.status.as_deref() == Some("BLOCKED") {
        return Some(HaltReason::Blocked);
    }

    if raw.contains('?') {
        return Some(HaltReason::AskedQuestion);
    }

    if ambiguity_regex().is_match(&raw) {
        return Some(HaltReason::Ambiguity);
    }

    if !required_keys.is_empty() {
        let missing_or_invalid = match extract_terminating_json(&raw) {
            Some(json) => required_keys.iter().any(|k| json.get(*k).is_none()),
            None => true,
        };
        if missing_or_invalid {
            return Some(HaltReason::OutputFormatInvalid);
        }
    }

    None
}

/// Extracts the outermost JSON object from the agent's final stdout,
/// tolerating one surrounding code fence (spec §4.6.1). Shared with
/// `validation::standard`, which performs the same extraction.
pub fn extract_terminating_json(text: &str) -> Option<serde_json::Value> {
    crate::validation::standard::extract_outermost_json(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stdout: &str, exit_code: i32, status: Option<&str>) -> ProviderResult {
        ProviderResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            status: status.map(|s| s.to_string()),
            session_id: None,
            usage: None,
        }
    }

    #[test]
    fn resource_exhausted_preempts_exit_code() {
        let r = result("resource_exhausted: quota hit", 1, None);
        assert_eq!(detect(&r, &[]), Some(HaltReason::ResourceExhausted));
    }

    #[test]
    fn connect_and_exhausted_both_present_trips_resource_exhausted() {
        let r = result("could not connect, resource pool exhausted", 0, None);
        assert_eq!(detect(&r, &[]), Some(HaltReason::ResourceExhausted));
    }

    #[test]
    fn nonzero_exit_code_is_cursor_exec_failure() {
        let r = result("some output", 2, None);
        assert_eq!(detect(&r, &[]), Some(HaltReason::CursorExecFailure));
    }

    #[test]
    fn blocked_status_wins_over_question_mark() {
        let r = result("why did this happen?", 0, Some("BLOCKED"));
        assert_eq!(detect(&r, &[]), Some(HaltReason::Blocked));
    }

    #[test]
    fn question_mark_is_asked_question() {
        let r = result("should I proceed?", 0, None);
        assert_eq!(detect(&r, &[]), Some(HaltReason::AskedQuestion));
    }

    #[test]
    fn ambiguity_word_boundary_match() {
        let r = result("we could try option B instead", 0, None);
        assert_eq!(detect(&r, &[]), Some(HaltReason::Ambiguity));
    }

    #[test]
    fn ambiguity_does_not_match_substrings() {
        // "could" inside "shoulder" must not match the word-boundary regex.
        let r = result("shoulder blade reconstruction complete", 0, None);
        assert_eq!(detect(&r, &[]), None);
    }

    #[test]
    fn missing_required_key_is_output_format_invalid() {
        let r = result(r#"{"status":"completed"}"#, 0, None);
        assert_eq!(
            detect(&r, REQUIRED_JSON_KEYS),
            Some(HaltReason::OutputFormatInvalid)
        );
    }

    #[test]
    fn valid_terminating_json_with_all_keys_is_clean() {
        let r = result(
            r#"{"status":"completed","files_created":[],"files_updated":[],"changes":"x","neededChanges":[],"summary":"done"}"#,
            0,
            None,
        );
        assert_eq!(detect(&r, REQUIRED_JSON_KEYS), None);
    }

    #[test]
    fn clean_result_with_no_required_keys_is_none() {
        let r = result("all good, nothing to report", 0, None);
        assert_eq!(detect(&r, &[]), None);
    }
}
