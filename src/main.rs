use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use foundry::cli::{Cli, Command};
use foundry::command_executor::ShellCommandExecutor;
use foundry::config::FoundryConfig;
use foundry::dispatcher::{ProcessProviderAdapter, ProviderDispatcher};
use foundry::project;
use foundry::run_loop::{ControlLoop, IterationOutcome};
use foundry::session::SessionResolver;
use foundry::state::{Goal, QueueState, SupervisorState, SupervisorStatus};
use foundry::store::redis_store::{self, RedisCircuitBreakerStore, RedisStateStore, RedisTaskQueue};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = project::discover();
    let config = FoundryConfig::load(config_path.as_deref())?;

    let redis_url = cli.redis_url.clone().unwrap_or_else(|| config.redis_url.clone());
    let sandbox_root: std::path::PathBuf = cli
        .sandbox_root
        .clone()
        .unwrap_or_else(|| "sandbox".to_string())
        .into();

    let state_conn = redis_store::connect(&redis_url, 0).await?;
    let queue_conn = redis_store::connect(&redis_url, 2).await?;
    let breaker_conn = redis_store::connect(&redis_url, 1).await?;

    let state_store: Arc<dyn foundry::store::StateStorePort> =
        Arc::new(RedisStateStore::new(state_conn, config.state_key.clone()));
    let queue: Arc<dyn foundry::store::TaskQueuePort> = Arc::new(RedisTaskQueue::new(queue_conn, config.queue_name.clone()));
    let breaker = Arc::new(RedisCircuitBreakerStore::new(breaker_conn));

    match cli.command {
        Command::InitState { project_id } => {
            let state = SupervisorState {
                status: SupervisorStatus::Running,
                iteration: 0,
                goal: Goal {
                    description: String::new(),
                    completed: false,
                    project_id,
                },
                queue: QueueState::default(),
                current_task: None,
                completed_tasks: vec![],
                blocked_tasks: vec![],
                active_sessions: Default::default(),
                resource_exhausted_retry: None,
                task_counters: Default::default(),
                halt_reason: None,
                halt_details: None,
                execution_mode: foundry::state::ExecutionMode::Auto,
                last_updated: Utc::now(),
                extra: Default::default(),
            };
            state_store.set(&state.to_wire_json()?).await?;
            println!("{}", "state initialized".green());
        }
        Command::SetGoal { description } => {
            let Some(value) = state_store.get().await? else {
                anyhow::bail!("no state found; run init-state first");
            };
            let mut state = SupervisorState::from_wire_json(value)?;
            state.goal.description = description;
            state_store.set(&state.to_wire_json()?).await?;
            println!("{}", "goal updated".green());
        }
        Command::Enqueue { task_file } => {
            let raw = std::fs::read_to_string(&task_file)?;
            let task: foundry::state::Task = serde_json::from_str(&raw)?;
            queue.rpush(&task).await?;
            println!("{} {}", "enqueued".green(), task.task_id);
        }
        Command::Halt { reason } => {
            let Some(value) = state_store.get().await? else {
                anyhow::bail!("no state found; run init-state first");
            };
            let mut state = SupervisorState::from_wire_json(value)?;
            state.status = SupervisorStatus::Halted;
            state.halt_details = reason;
            state_store.set(&state.to_wire_json()?).await?;
            println!("{}", "halt requested".yellow());
        }
        Command::Resume => {
            let Some(value) = state_store.get().await? else {
                anyhow::bail!("no state found; run init-state first");
            };
            let mut state = SupervisorState::from_wire_json(value)?;
            state.status = SupervisorStatus::Running;
            state.halt_reason = None;
            state.halt_details = None;
            state_store.set(&state.to_wire_json()?).await?;
            println!("{}", "resumed".green());
        }
        Command::Status => {
            let Some(value) = state_store.get().await? else {
                anyhow::bail!("no state found; run init-state first");
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Start { poll_interval_seconds } => {
            foundry::interrupt::register_signal_handlers()?;

            let dispatcher = ProviderDispatcher::new(
                config.provider_priority(),
                breaker,
                config.circuit_breaker_ttl_seconds,
                Arc::new(ProcessProviderAdapter::default()),
            );

            let control_loop = ControlLoop {
                state_store,
                queue,
                dispatcher,
                executor: Arc::new(ShellCommandExecutor),
                config: config.clone(),
                sandbox_root,
                session_resolver: SessionResolver::new(config.session_error_threshold),
            };

            loop {
                if foundry::interrupt::is_shutdown_requested() {
                    println!("{}", "shutdown requested, exiting at iteration boundary".yellow());
                    break;
                }

                match control_loop.run_iteration().await? {
                    IterationOutcome::Halted | IterationOutcome::GoalCompleted => break,
                    IterationOutcome::NoOp => {
                        tokio::time::sleep(std::time::Duration::from_secs(poll_interval_seconds)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
