//! Validation Pipeline (spec §4.6): four validators run in strict order,
//! each only permitted to upgrade `valid: false -> true`. Modeled as an
//! ordered list of functions sharing a context struct, the same shape the
//! retry orchestrator uses (§9, "Strategy dispatch"), generalized to four
//! stages instead of one.

pub mod deterministic;
pub mod helper_agent;
pub mod interrogation;
pub mod standard;

use crate::command_executor::CommandExecutorPort;
use crate::dispatcher::ProviderDispatcher;
use crate::session::SessionResolver;
use crate::state::{ActiveSession, FeatureId, Task, ValidationReport};
use std::collections::HashMap;
use std::path::Path;

pub struct PipelineContext<'a> {
    pub task: &'a Task,
    pub raw_output: &'a str,
    pub sandbox_root: &'a Path,
    pub deterministic_enabled: bool,
    pub deterministic_percent: u8,
    pub already_interrogated: bool,
}

pub struct PipelineOutcome {
    pub report: ValidationReport,
    /// Set true if HelperAgentValidator or InterrogationValidator performed a
    /// dispatch, for audit/prompt-log bookkeeping at the call site.
    pub helper_dispatched: bool,
    pub interrogation_ran: bool,
}

/// Runs all four validators in order against an initial report produced by
/// `StandardValidator`. `dispatcher`/`executor` are used only by the stages
/// that need to talk to an agent or run shell commands; `session_resolver`/
/// `active_sessions` let HelperAgentValidator persist and reuse its own
/// session the same way a primary task dispatch does (spec §4.6.3, §4.8).
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    ctx: &PipelineContext<'_>,
    dispatcher: &ProviderDispatcher,
    executor: &dyn CommandExecutorPort,
    session_resolver: &SessionResolver,
    active_sessions: &mut HashMap<FeatureId, ActiveSession>,
) -> anyhow::Result<PipelineOutcome> {
    let mut report = standard::validate(ctx.task, ctx.raw_output, ctx.sandbox_root);
    let mut helper_dispatched = false;
    let mut interrogation_ran = false;

    if !report.valid && ctx.deterministic_enabled && deterministic::gate_passes(ctx.deterministic_percent) {
        deterministic::validate(ctx.task, ctx.sandbox_root, &mut report);
    }

    if !report.valid {
        helper_dispatched = true;
        helper_agent::validate(
            ctx.task,
            ctx.sandbox_root,
            dispatcher,
            executor,
            &mut report,
            session_resolver,
            active_sessions,
        )
        .await?;
    }

    if interrogation::should_run(&report, ctx.already_interrogated) {
        interrogation_ran = true;
        interrogation::validate(ctx.task, dispatcher, &mut report).await?;
    }

    Ok(PipelineOutcome {
        report,
        helper_dispatched,
        interrogation_ran,
    })
}
