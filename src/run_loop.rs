//! The Control Loop (spec §4.1): `run_iteration()`, the single operation
//! this whole crate exists to support. Pure of return value — every effect
//! goes through a port: load → select → dispatch → validate → persist,
//! against Foundry's external KV-store ports.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditEvent, AuditLog, StateDiff};
use crate::command_executor::CommandExecutorPort;
use crate::config::FoundryConfig;
use crate::dispatcher::{DispatchRequest, ProviderDispatcher};
use crate::error::FatalError;
use crate::halt::{self, REQUIRED_JSON_KEYS};
use crate::prompt;
use crate::prompt_log::{PromptLog, PromptLogEntry, PromptLogType};
use crate::retry::{self, RetryContext};
use crate::sandbox::Sandbox;
use crate::session::SessionResolver;
use crate::state::{
    BlockedTask, CompletedTask, HaltReason, RetryDecision, SupervisorState, SupervisorStatus,
    Task, ValidationReport,
};
use crate::store::{StateStorePort, TaskQueuePort};
use crate::validation::interrogation;
use crate::validation::{run_pipeline, PipelineContext};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn file_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w./-]+\.[A-Za-z0-9]+").expect("file token pattern is valid"))
}

/// Best-effort extraction of file snippets for `buildFixPrompt` (spec §4.5):
/// any path-shaped token named in a failing criterion that resolves under
/// the sandbox, truncated to the first ~50 lines by the prompt builder.
fn gather_fix_snippets(failed_criteria: &[String], sandbox_root: &Path) -> Vec<(String, String)> {
    let mut snippets = Vec::new();
    for criterion in failed_criteria {
        for m in file_token_regex().find_iter(criterion) {
            let rel = Path::new(m.as_str());
            if rel.is_absolute() || rel.components().any(|c| c == std::path::Component::ParentDir) {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(sandbox_root.join(rel)) {
                snippets.push((m.as_str().to_string(), content));
            }
        }
    }
    snippets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No work was done: halted, completed, or cooperatively slept through a
    /// resource-exhaustion back-off window.
    NoOp,
    TaskCompleted,
    TaskBlocked,
    TaskRetried,
    Halted,
    GoalCompleted,
}

pub struct ControlLoop {
    pub state_store: Arc<dyn StateStorePort>,
    pub queue: Arc<dyn TaskQueuePort>,
    pub dispatcher: ProviderDispatcher,
    pub executor: Arc<dyn CommandExecutorPort>,
    pub config: FoundryConfig,
    pub sandbox_root: PathBuf,
    pub session_resolver: SessionResolver,
}

impl ControlLoop {
    async fn load_state(&self) -> anyhow::Result<SupervisorState> {
        let value = self
            .state_store
            .get()
            .await?
            .ok_or(FatalError::StateMissing)?;
        SupervisorState::from_wire_json(value).map_err(|e| FatalError::StateCorrupt(e.to_string()).into())
    }

    async fn persist(&self, state: &SupervisorState) -> anyhow::Result<()> {
        let wire = state.to_wire_json()?;
        self.state_store
            .set(&wire)
            .await
            .map_err(|e| FatalError::Infrastructure(e.to_string()))?;
        Ok(())
    }

    fn audit_log(&self, state: &SupervisorState) -> AuditLog {
        AuditLog::new(&self.sandbox_root, &state.goal.project_id)
    }

    fn prompt_log(&self, state: &SupervisorState) -> PromptLog {
        PromptLog::new(&self.sandbox_root, &state.goal.project_id)
    }

    /// Runs exactly one iteration of the control loop (spec §4.1).
    pub async fn run_iteration(&self) -> anyhow::Result<IterationOutcome> {
        let mut state = self.load_state().await?;

        if matches!(state.status, SupervisorStatus::Halted | SupervisorStatus::Completed) {
            return Ok(IterationOutcome::NoOp);
        }

        if let Some(pending) = &state.resource_exhausted_retry {
            let now = Utc::now();
            if pending.next_retry_at > now {
                let wait = (pending.next_retry_at - now).to_std().unwrap_or_default();
                info!(seconds = wait.as_secs(), "sleeping for resource-exhaustion back-off");
                tokio::time::sleep(wait).await;
            }
        }

        state.iteration += 1;

        let task = match state.current_task.clone() {
            Some(task) => task,
            None => match self.queue.lpop().await? {
                Some(task) => {
                    state.current_task = Some(task.clone());
                    task
                }
                None => {
                    state.queue.exhausted = true;
                    return self.handle_goal_completion_check(state).await;
                }
            },
        };

        let sandbox = Sandbox::new(&self.sandbox_root, &state.goal.project_id);
        sandbox.ensure_exists().ok();

        let prompt_text = prompt::build_prompt(&task, &state);
        self.log_prompt(&state, &task, PromptLogType::Prompt, &prompt_text);

        let existing_session = task
            .feature_id
            .as_deref()
            .and_then(|fid| self.session_resolver.lookup(&state.active_sessions, fid))
            .map(|s| s.session_id.clone());
        let req = DispatchRequest {
            prompt: &prompt_text,
            cwd: sandbox.path(),
            agent_mode: self.config.helper_agent_mode.as_deref(),
            session_id: existing_session.as_deref(),
            feature_id: task.feature_id.as_deref(),
        };
        let (result, provider) = self.dispatcher.execute(&req).await;
        self.log_prompt(&state, &task, PromptLogType::Response, &result.raw_output());

        if let Some(provider) = provider {
            if let Some(feature_id) = &task.feature_id {
                self.session_resolver.record_success(
                    &mut state.active_sessions,
                    feature_id,
                    provider,
                    result.session_id.as_deref(),
                );
            }
        } else if let Some(feature_id) = &task.feature_id {
            self.session_resolver.record_failure(&mut state.active_sessions, feature_id);
        }

        let halt_reason = halt::detect(&result, REQUIRED_JSON_KEYS);

        if halt_reason == Some(HaltReason::ResourceExhausted) {
            return self.schedule_resource_exhausted_retry(state, task, &prompt_text, &result.raw_output()).await;
        }

        // A dispatch that got this far produced a non-resource-exhausted
        // response, so any outstanding backoff window from an earlier
        // iteration is resolved.
        state.resource_exhausted_retry = None;

        let retry_count_so_far = state.counters_for(&task.task_id).retry_count;
        let already_interrogated = state
            .task_counters
            .get(&task.task_id)
            .map(|c| c.interrogation_performed(retry_count_so_far))
            .unwrap_or(false);

        let raw_output = result.raw_output();
        let ctx = PipelineContext {
            task: &task,
            raw_output: &raw_output,
            sandbox_root: sandbox.path(),
            deterministic_enabled: self.config.helper_deterministic_enabled,
            deterministic_percent: self.config.helper_deterministic_percent,
            already_interrogated,
        };
        let outcome = run_pipeline(
            &ctx,
            &self.dispatcher,
            self.executor.as_ref(),
            &self.session_resolver,
            &mut state.active_sessions,
        )
        .await?;
        if outcome.interrogation_ran {
            let attempt = state.counters_for(&task.task_id).retry_count;
            state.counters_for(&task.task_id).mark_interrogation_performed(attempt);
        }

        let mut report = outcome.report;
        let mut halt_reason = halt_reason;
        let mut last_prompt = prompt_text;
        let mut last_response = result.raw_output();

        let retry_ctx = RetryContext {
            task: &task,
            report: &report,
            halt_reason,
        };
        let mut decision = retry::decide(&mut state, &retry_ctx, None);

        if decision.is_none() {
            let retry_count = state.counters_for(&task.task_id).retry_count;
            if retry_count >= task.retry_policy.max_retries {
                // MaxRetriesStrategy (spec §4.7.2): an evidentiary final sweep,
                // no further agent dispatch beyond the confirmation itself.
                // Mapped directly rather than re-entering `retry::decide` so
                // `repeated_error_strategy` isn't evaluated twice for one report.
                let confirmed =
                    interrogation::final_sweep(&task, &report.failed_criteria, &self.dispatcher).await?;
                decision = Some(if confirmed {
                    RetryDecision::Complete
                } else {
                    RetryDecision::Block
                });
            } else {
                let (next_decision, next_report, next_halt, next_prompt, next_response) = self
                    .run_default_retry_path(&mut state, &task, &sandbox, &report, halt_reason)
                    .await?;
                decision = next_decision;
                report = next_report;
                halt_reason = next_halt;
                last_prompt = next_prompt;
                last_response = next_response;
            }
        }

        self.apply_decision(state, task, report, halt_reason, decision, &last_prompt, &last_response)
            .await
    }

    /// The Retry Orchestrator's default path (spec §4.7.4): builds a fix or
    /// clarification prompt depending on why the first dispatch didn't
    /// validate, dispatches it once more, and re-runs halt detection and the
    /// validation pipeline on that single extra response. A critical hard
    /// halt on this dispatch (`BLOCKED`, `OUTPUT_FORMAT_INVALID`,
    /// `PROVIDER_CIRCUIT_BROKEN`) halts immediately rather than retrying.
    ///
    /// Per the design note in spec §9: a clarification-only round (ambiguity
    /// or an asked question) does not increment `retry_count_<id>` since it
    /// resolves the same attempt; a fix-prompt round does.
    async fn run_default_retry_path(
        &self,
        state: &mut SupervisorState,
        task: &Task,
        sandbox: &Sandbox,
        report: &ValidationReport,
        halt_reason: Option<HaltReason>,
    ) -> anyhow::Result<(Option<RetryDecision>, ValidationReport, Option<HaltReason>, String, String)> {
        let is_clarification = matches!(halt_reason, Some(HaltReason::Ambiguity) | Some(HaltReason::AskedQuestion));

        let (second_prompt, log_type) = if is_clarification {
            (
                prompt::build_clarification_prompt(task, halt_reason.unwrap()),
                PromptLogType::ClarificationPrompt,
            )
        } else {
            let is_repeated = state
                .task_counters
                .get(&task.task_id)
                .map(|c| c.repeated_error_count > 0)
                .unwrap_or(false);
            let snippets = gather_fix_snippets(&report.failed_criteria, sandbox.path());
            (
                prompt::build_fix_prompt(task, report, is_repeated, &snippets),
                PromptLogType::FixPrompt,
            )
        };
        self.log_prompt(state, task, log_type, &second_prompt);

        let existing_session = task
            .feature_id
            .as_deref()
            .and_then(|fid| self.session_resolver.lookup(&state.active_sessions, fid))
            .map(|s| s.session_id.clone());
        let req = DispatchRequest {
            prompt: &second_prompt,
            cwd: sandbox.path(),
            agent_mode: self.config.helper_agent_mode.as_deref(),
            session_id: existing_session.as_deref(),
            feature_id: task.feature_id.as_deref(),
        };
        let (result, provider) = self.dispatcher.execute(&req).await;
        self.log_prompt(state, task, PromptLogType::Response, &result.raw_output());

        if let Some(provider) = provider {
            if let Some(feature_id) = &task.feature_id {
                self.session_resolver
                    .record_success(&mut state.active_sessions, feature_id, provider, result.session_id.as_deref());
            }
        } else if let Some(feature_id) = &task.feature_id {
            self.session_resolver.record_failure(&mut state.active_sessions, feature_id);
        }

        let second_halt = halt::detect(&result, REQUIRED_JSON_KEYS);
        let response_preview = result.raw_output();

        if retry::is_critical_hard_halt(second_halt) {
            state.current_task = None;
            return Ok((Some(RetryDecision::Block), report.clone(), second_halt, second_prompt, response_preview));
        }

        // A resource-exhaustion halt on this second dispatch is left to the
        // validation pipeline below, which will fail to parse the malformed
        // output and fall into the ordinary retry path on the next iteration
        // rather than scheduling its own back-off window mid-iteration.

        let already_interrogated = state
            .task_counters
            .get(&task.task_id)
            .map(|c| c.interrogation_performed(c.retry_count))
            .unwrap_or(false);
        let ctx = PipelineContext {
            task,
            raw_output: &response_preview,
            sandbox_root: sandbox.path(),
            deterministic_enabled: self.config.helper_deterministic_enabled,
            deterministic_percent: self.config.helper_deterministic_percent,
            already_interrogated,
        };
        let outcome = run_pipeline(
            &ctx,
            &self.dispatcher,
            self.executor.as_ref(),
            &self.session_resolver,
            &mut state.active_sessions,
        )
        .await?;
        if outcome.interrogation_ran {
            let attempt = state.counters_for(&task.task_id).retry_count;
            state.counters_for(&task.task_id).mark_interrogation_performed(attempt);
        }

        if !is_clarification {
            state.counters_for(&task.task_id).retry_count += 1;
        }

        let decision = if outcome.report.valid {
            Some(RetryDecision::Complete)
        } else {
            state.current_task = Some(task.clone());
            Some(RetryDecision::Retry)
        };

        Ok((decision, outcome.report, second_halt, second_prompt, response_preview))
    }

    fn log_prompt(&self, state: &SupervisorState, task: &crate::state::Task, kind: PromptLogType, content: &str) {
        let log = self.prompt_log(state);
        let _ = log.append(&PromptLogEntry {
            task_id: task.task_id.clone(),
            iteration: state.iteration,
            entry_type: kind,
            content: content.to_string(),
            metadata: None,
        });
    }

    /// ResourceExhaustedStrategy (spec §4.7.3): schedules a back-off and
    /// leaves `current_task` bound rather than halting, unless the 5-attempt
    /// ceiling has been reached.
    async fn schedule_resource_exhausted_retry(
        &self,
        mut state: SupervisorState,
        task: crate::state::Task,
        prompt_preview: &str,
        response_preview: &str,
    ) -> anyhow::Result<IterationOutcome> {
        let attempt = state.resource_exhausted_retry.as_ref().map(|r| r.attempt + 1).unwrap_or(1);

        state.current_task = Some(task.clone());

        let outcome = match retry::resource_exhausted_backoff_seconds(attempt) {
            Some(seconds) => {
                let now = Utc::now();
                state.resource_exhausted_retry = Some(crate::state::ResourceExhaustedRetry {
                    attempt,
                    last_attempt_at: now,
                    next_retry_at: now + chrono::Duration::seconds(seconds),
                });
                state.halt_reason = Some(HaltReason::ResourceExhausted);
                IterationOutcome::TaskRetried
            }
            None => {
                state.status = SupervisorStatus::Halted;
                state.halt_reason = Some(HaltReason::ResourceExhausted);
                state.halt_details = Some(format!("resource exhaustion persisted past attempt {attempt}"));
                IterationOutcome::Halted
            }
        };

        state.last_updated = Utc::now();
        self.persist(&state).await?;

        if outcome == IterationOutcome::Halted {
            let entry = AuditEntry {
                timestamp: Utc::now(),
                iteration: state.iteration,
                event: AuditEvent::Halt,
                task_id: Some(task.task_id.clone()),
                tool_invoked: task.tool.clone(),
                state_diff: StateDiff {
                    before: serde_json::Value::Null,
                    after: state.to_wire_json().unwrap_or(serde_json::Value::Null),
                },
                validation_summary: None,
                halt_reason: state.halt_reason,
                prompt_preview: crate::audit::preview(prompt_preview, 200),
                response_preview: crate::audit::preview(response_preview, 200),
                prompt_length: prompt_preview.len(),
                response_length: response_preview.len(),
            };
            let _ = self.audit_log(&state).append(&entry);
        }

        Ok(outcome)
    }

    async fn handle_goal_completion_check(&self, mut state: SupervisorState) -> anyhow::Result<IterationOutcome> {
        if state.goal.completed {
            state.status = SupervisorStatus::Completed;
            self.persist(&state).await?;
            self.append_audit(&state, AuditEvent::GoalCompleted, None, None, None).await;
            return Ok(IterationOutcome::GoalCompleted);
        }

        state.status = SupervisorStatus::Halted;
        state.halt_reason = Some(HaltReason::TaskListExhaustedGoalIncomplete);
        state.halt_details = Some("queue exhausted with incomplete goal".to_string());
        self.persist(&state).await?;
        self.append_audit(
            &state,
            AuditEvent::Halt,
            None,
            Some(HaltReason::TaskListExhaustedGoalIncomplete),
            None,
        )
        .await;
        Ok(IterationOutcome::Halted)
    }

    async fn apply_decision(
        &self,
        mut state: SupervisorState,
        task: crate::state::Task,
        report: crate::state::ValidationReport,
        halt_reason: Option<HaltReason>,
        decision: Option<RetryDecision>,
        prompt_preview: &str,
        response_preview: &str,
    ) -> anyhow::Result<IterationOutcome> {
        let before = state.to_wire_json().unwrap_or(serde_json::Value::Null);

        let outcome = match decision {
            Some(RetryDecision::Complete) => {
                state.current_task = None;
                let retry_count = state
                    .task_counters
                    .get(&task.task_id)
                    .map(|c| c.retry_count)
                    .unwrap_or(0);
                state.completed_tasks.push(CompletedTask {
                    task_id: task.task_id.clone(),
                    completed_at: Utc::now(),
                    summary: report.reason.clone(),
                    retry_count,
                });
                state.task_counters.remove(&task.task_id);
                IterationOutcome::TaskCompleted
            }
            Some(RetryDecision::Block) => {
                state.current_task = None;
                let reason = report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "validation failed".to_string());
                state.blocked_tasks.push(BlockedTask {
                    task_id: task.task_id.clone(),
                    blocked_at: Utc::now(),
                    reason,
                });
                if retry::is_critical_hard_halt(halt_reason) {
                    state.status = SupervisorStatus::Halted;
                    state.halt_reason = halt_reason;
                }
                IterationOutcome::TaskBlocked
            }
            Some(RetryDecision::Retry) | None => {
                // retry_count_<id> is bumped by the Retry Orchestrator's
                // default path itself (spec §4.7.4), not here, since a
                // clarification-only round must not increment it.
                state.current_task = Some(task.clone());
                IterationOutcome::TaskRetried
            }
        };

        state.last_updated = Utc::now();
        self.persist(&state).await?;

        let event = match outcome {
            IterationOutcome::TaskCompleted => AuditEvent::TaskCompleted,
            IterationOutcome::TaskBlocked => AuditEvent::TaskBlocked,
            _ if state.status == SupervisorStatus::Halted => AuditEvent::Halt,
            _ => AuditEvent::TaskCompleted,
        };

        if matches!(outcome, IterationOutcome::TaskCompleted | IterationOutcome::TaskBlocked)
            || state.status == SupervisorStatus::Halted
        {
            let after = state.to_wire_json().unwrap_or(serde_json::Value::Null);
            let entry = AuditEntry {
                timestamp: Utc::now(),
                iteration: state.iteration,
                event,
                task_id: Some(task.task_id.clone()),
                tool_invoked: task.tool.clone(),
                state_diff: StateDiff { before, after },
                validation_summary: Some(format!("valid={}", report.valid)),
                halt_reason: state.halt_reason,
                prompt_preview: crate::audit::preview(prompt_preview, 200),
                response_preview: crate::audit::preview(response_preview, 200),
                prompt_length: prompt_preview.len(),
                response_length: response_preview.len(),
            };
            let _ = self.audit_log(&state).append(&entry);
        }

        if state.status == SupervisorStatus::Halted {
            warn!(halt_reason = ?state.halt_reason, "control loop halted");
        }

        Ok(outcome)
    }

    async fn append_audit(
        &self,
        state: &SupervisorState,
        event: AuditEvent,
        task_id: Option<String>,
        halt_reason: Option<HaltReason>,
        validation_summary: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            iteration: state.iteration,
            event,
            task_id,
            tool_invoked: None,
            state_diff: StateDiff {
                before: serde_json::Value::Null,
                after: state.to_wire_json().unwrap_or(serde_json::Value::Null),
            },
            validation_summary,
            halt_reason,
            prompt_preview: String::new(),
            response_preview: String::new(),
            prompt_length: 0,
            response_length: 0,
        };
        let _ = self.audit_log(state).append(&entry);
    }
}
