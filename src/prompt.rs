//! Prompt Builder (spec §4.5): three prompt variants sharing one Rules
//! Block. The unicode-safe truncation and "selectively include state, never
//! restate everything" approach degrades gracefully instead of erroring out
//! on oversized context.

use crate::state::{BlockedTask, CompletedTask, HaltReason, SupervisorState, Task, ValidationReport};

const RULES_BLOCK: &str = "\
Rules:\n\
- Use only the context provided in this prompt; do not assume information outside it.\n\
- Stay within the prescribed agent mode.\n\
- Respond with your code changes followed by a single terminating JSON object \
whose keys are exactly {status, files_created, files_updated, changes, neededChanges, summary}, \
with all paths relative to the sandbox root.\n";

const EXTEND_KEYWORDS: &[&str] = &["extend", "previous", "build on", "based on"];
const TEMPORAL_KEYWORDS: &[&str] = &["next", "after", "before", "then", "once", "until"];
const UNBLOCK_KEYWORDS: &[&str] = &["unblock", "blocked"];

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Truncates to the first `max_chars` characters on a char boundary,
/// appending a truncation notice.
pub fn truncate_context(text: &str, max_chars: usize, hint: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}\n[Truncated -- full file at {hint}]")
}

fn format_completed(task: &Task, completed: &[CompletedTask]) -> String {
    let include_extended = mentions_any(&task.instructions, EXTEND_KEYWORDS) || mentions_any(&task.intent, EXTEND_KEYWORDS);
    let take = if include_extended { 5 } else { 1 };
    completed
        .iter()
        .rev()
        .take(take)
        .map(|c| format!("- {} ({})", c.task_id, c.summary.as_deref().unwrap_or("no summary")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_blocked(task: &Task, blocked: &[BlockedTask]) -> Option<String> {
    if !mentions_any(&task.instructions, UNBLOCK_KEYWORDS) {
        return None;
    }
    Some(
        blocked
            .iter()
            .map(|b| format!("- {} ({})", b.task_id, b.reason))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// buildPrompt(task, minimalState) (spec §4.5).
pub fn build_prompt(task: &Task, state: &SupervisorState) -> String {
    let mut sections = Vec::new();

    if mentions_any(&task.instructions, &["goal"]) || mentions_any(&task.intent, &["goal"]) {
        sections.push(format!("Goal: {}", state.goal.description));
    }

    let completed = format_completed(task, &state.completed_tasks);
    if !completed.is_empty() {
        sections.push(format!("Recently completed tasks:\n{completed}"));
    }

    if mentions_any(&task.instructions, TEMPORAL_KEYWORDS) {
        sections.push(format!(
            "Queue status: {}",
            if state.queue.exhausted { "exhausted" } else { "tasks pending" }
        ));
    }

    if let Some(blocked) = format_blocked(task, &state.blocked_tasks) {
        sections.push(format!("Blocked tasks:\n{blocked}"));
    }

    sections.push(format!(
        "Task {}: {}\nIntent: {}\nAcceptance criteria:\n{}",
        task.task_id,
        task.instructions,
        task.intent,
        task.acceptance_criteria
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    ));

    sections.push(RULES_BLOCK.to_string());
    sections.join("\n\n")
}

/// buildFixPrompt(task, minimalState, validationReport) (spec §4.5).
pub fn build_fix_prompt(task: &Task, report: &ValidationReport, is_repeated_error: bool, file_snippets: &[(String, String)]) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "Failing criteria:\n{}",
        report
            .failed_criteria
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    ));

    for (path, content) in file_snippets {
        let snippet: String = content.lines().take(50).collect::<Vec<_>>().join("\n");
        sections.push(format!("--- {path} (first 50 lines) ---\n{snippet}"));
    }

    if is_repeated_error {
        sections.push(
            "STRICT ADHERENCE: the previous attempt repeated the same error. Address every \
             failing criterion exactly as stated; do not introduce unrelated changes."
                .to_string(),
        );
    }

    sections.push(format!("Task id: {}", task.task_id));
    sections.push(RULES_BLOCK.to_string());
    sections.join("\n\n")
}

/// buildClarificationPrompt(task, minimalState, haltReason) (spec §4.5).
pub fn build_clarification_prompt(task: &Task, halt_reason: HaltReason) -> String {
    assert!(matches!(halt_reason, HaltReason::Ambiguity | HaltReason::AskedQuestion));
    format!(
        "Your previous response for task {} was {}. Answer definitively using only the \
         information already provided; do not ask further questions or present alternatives.\n\n{}",
        task.task_id,
        match halt_reason {
            HaltReason::Ambiguity => "ambiguous",
            HaltReason::AskedQuestion => "a question rather than a resolution",
            _ => unreachable!(),
        },
        RULES_BLOCK
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ExecutionMode, Goal, QueueState, RetryPolicy, SupervisorStatus, TaskType};
    use chrono::Utc;
    use std::collections::HashMap;

    fn task() -> Task {
        Task {
            task_id: "t-1".into(),
            intent: "build on the previous export".into(),
            task_type: TaskType::Coding,
            instructions: "extend the prior module".into(),
            acceptance_criteria: vec!["file src/a.ts exists".into()],
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

    fn state() -> SupervisorState {
        SupervisorState {
            status: SupervisorStatus::Running,
            iteration: 0,
            goal: Goal {
                description: "ship the feature".into(),
                completed: false,
                project_id: "p".into(),
            },
            queue: QueueState::default(),
            current_task: None,
            completed_tasks: vec![
                CompletedTask {
                    task_id: "t-0".into(),
                    completed_at: Utc::now(),
                    summary: Some("wired the base module".into()),
                    retry_count: 0,
                },
            ],
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
    fn build_prompt_includes_extended_history_on_extend_keyword() {
        let prompt = build_prompt(&task(), &state());
        assert!(prompt.contains("wired the base module"));
        assert!(prompt.contains("Rules:"));
    }

    #[test]
    fn build_prompt_omits_goal_when_not_referenced() {
        let mut t = task();
        t.instructions = "add a helper function".into();
        t.intent = "add a helper".into();
        let prompt = build_prompt(&t, &state());
        assert!(!prompt.contains("Goal:"));
    }

    #[test]
    fn truncate_context_preserves_short_text() {
        assert_eq!(truncate_context("hello", 100, "x.ts"), "hello");
    }

    #[test]
    fn truncate_context_cuts_on_char_boundary_and_notes_hint() {
        let text = "é".repeat(200);
        let truncated = truncate_context(&text, 10, "src/a.ts");
        assert!(truncated.contains("[Truncated -- full file at src/a.ts]"));
    }

    #[test]
    fn build_fix_prompt_appends_strict_adherence_on_repeat() {
        let report = ValidationReport {
            valid: false,
            confidence: crate::state::Confidence::Low,
            rules_passed: vec![],
            rules_failed: vec!["missing export X".into()],
            failed_criteria: vec!["missing export X".into()],
            uncertain_criteria: vec![],
            reason: None,
        };
        let prompt = build_fix_prompt(&task(), &report, true, &[]);
        assert!(prompt.contains("STRICT ADHERENCE"));
    }

    #[test]
    fn build_clarification_prompt_names_the_halt_reason() {
        let prompt = build_clarification_prompt(&task(), HaltReason::Ambiguity);
        assert!(prompt.contains("ambiguous"));
    }
}
