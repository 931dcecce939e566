//! CLI surface (spec §6, explicitly out of core scope but enumerated for
//! completeness): `init-state`, `set-goal`, `enqueue`, `halt`, `resume`,
//! `status`, `start`. Thin wiring over the ports; no business logic lives
//! here beyond what's needed to drive the control loop from a terminal —
//! argument parsing stays fully separate from the actual loop driver in
//! `main.rs`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "foundry", about = "Deterministic orchestration engine for autonomous coding agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Redis-compatible base URL, e.g. redis://127.0.0.1:6379.
    #[arg(long, env = "FOUNDRY_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Root directory under which `<project_id>/` sandboxes live.
    #[arg(long, env = "FOUNDRY_SANDBOX_ROOT", global = true)]
    pub sandbox_root: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Writes a fresh SupervisorState document for a project.
    InitState {
        #[arg(long)]
        project_id: String,
    },
    /// Sets or replaces the active goal description.
    SetGoal {
        #[arg(long)]
        description: String,
    },
    /// Appends a task descriptor (read from a JSON file) to the queue.
    Enqueue {
        #[arg(long)]
        task_file: String,
    },
    /// Requests a graceful halt at the next iteration boundary.
    Halt {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Clears a halt and resumes RUNNING status.
    Resume,
    /// Prints the current SupervisorState as JSON.
    Status,
    /// Runs the control loop until halted or completed.
    Start {
        /// Sleep between iterations when the queue is momentarily empty.
        #[arg(long, default_value_t = 5)]
        poll_interval_seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_default_poll_interval() {
        let cli = Cli::parse_from(["foundry", "start"]);
        match cli.command {
            Command::Start { poll_interval_seconds } => assert_eq!(poll_interval_seconds, 5),
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn parses_enqueue_with_task_file() {
        let cli = Cli::parse_from(["foundry", "enqueue", "--task-file", "task.json"]);
        match cli.command {
            Command::Enqueue { task_file } => assert_eq!(task_file, "task.json"),
            _ => panic!("expected Enqueue"),
        }
    }
}
