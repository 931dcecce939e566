//! Retry Orchestrator (spec §4.7): an ordered list of strategies, the first
//! to return a decision wins — a plain match/if-else chain over a shared
//! context struct, no dynamic dispatch or registry needed for four fixed
//! stages.

use crate::state::{HaltReason, RetryDecision, SupervisorState, Task, ValidationReport};

/// Exponential-ish back-off table indexed by `resource_exhausted_retry.attempt`
/// (1-based). After index 5 the strategy falls through to halt handling.
const RESOURCE_EXHAUSTED_BACKOFF_SECONDS: [i64; 5] = [60, 300, 1200, 3600, 7200];

pub struct RetryContext<'a> {
    pub task: &'a Task,
    pub report: &'a ValidationReport,
    pub halt_reason: Option<HaltReason>,
}

/// Strategies that set `status=HALTED` outright, bypassing the normal
/// retry/block distinction (spec §4.7, "critical hard halts").
pub fn is_critical_hard_halt(halt_reason: Option<HaltReason>) -> bool {
    matches!(
        halt_reason,
        Some(HaltReason::Blocked) | Some(HaltReason::OutputFormatInvalid) | Some(HaltReason::ProviderCircuitBroken)
    )
}

/// RepeatedErrorStrategy (spec §4.7.1): three identical validation failures
/// in a row blocks the task outright.
fn repeated_error_strategy(state: &mut SupervisorState, ctx: &RetryContext) -> Option<RetryDecision> {
    let current_error = ctx
        .report
        .failed_criteria
        .first()
        .cloned()
        .or_else(|| ctx.report.reason.clone())?;

    let counters = state.counters_for(&ctx.task.task_id);
    counters.record_error(&current_error);

    if counters.repeated_error_count >= 3 {
        Some(RetryDecision::Block)
    } else {
        None
    }
}

/// MaxRetriesStrategy (spec §4.7.2). The final interrogation itself is run
/// by the caller before this strategy is consulted; `confirmed_complete`
/// reflects its outcome.
fn max_retries_strategy(
    state: &SupervisorState,
    ctx: &RetryContext,
    confirmed_complete: Option<bool>,
) -> Option<RetryDecision> {
    let counters = state.task_counters.get(&ctx.task.task_id)?;
    if counters.retry_count < ctx.task.retry_policy.max_retries {
        return None;
    }
    match confirmed_complete {
        Some(true) => Some(RetryDecision::Complete),
        Some(false) => Some(RetryDecision::Block),
        None => None,
    }
}

/// ResourceExhaustedStrategy (spec §4.7.3). Returns the back-off duration
/// to schedule, or `None` after the 5th attempt (falls through to halt).
pub fn resource_exhausted_backoff_seconds(attempt: u32) -> Option<i64> {
    RESOURCE_EXHAUSTED_BACKOFF_SECONDS
        .get((attempt.saturating_sub(1)) as usize)
        .copied()
}

/// Runs the strategies in fixed order. `confirmed_complete` carries the
/// result of a final interrogation sweep if the caller already ran one for
/// `MaxRetriesStrategy`; pass `None` if max_retries hasn't been reached yet
/// (the strategy then yields no decision and falls through to the default
/// path, which the control loop executes separately).
pub fn decide(
    state: &mut SupervisorState,
    ctx: &RetryContext,
    confirmed_complete: Option<bool>,
) -> Option<RetryDecision> {
    if ctx.report.valid {
        return Some(RetryDecision::Complete);
    }

    if is_critical_hard_halt(ctx.halt_reason) {
        return Some(RetryDecision::Block);
    }

    if let Some(decision) = repeated_error_strategy(state, ctx) {
        return Some(decision);
    }

    if let Some(decision) = max_retries_strategy(state, ctx, confirmed_complete) {
        return Some(decision);
    }

    None
}
