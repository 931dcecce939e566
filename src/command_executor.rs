//! Command Executor Port (spec §4.6.3 / §6): runs a fixed allow-list of
//! read-only shell commands for `HelperAgentValidator`'s verification step.
//! A single static allow/deny-list rather than per-rule-name policy groups,
//! since Foundry only ever needs read-only inspection commands.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::CommandExecutorError;

const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "find", "grep", "cat", "head", "tail", "wc", "file", "stat", "test", "[",
    "readlink", "pwd", "basename", "dirname", "git",
];

/// `git` is allow-listed only for these read-only subcommands.
const ALLOWED_GIT_SUBCOMMANDS: &[&str] = &["status", "log", "diff", "show", "ls-files", "grep"];

const DENY_PATTERNS: &[&str] = &[
    "rm", "mv", "cp", "chmod", "chown", "dd", "mkfs", "sudo", "npm", "pnpm", "yarn", "pip",
    "cargo", "apt", "apt-get", "brew",
];

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandExecutorPort: Send + Sync {
    /// Runs each command in `commands` against `cwd`, in order, stopping at
    /// the first disallowed command. Returns one `CommandOutcome` per
    /// command actually run.
    async fn run_all(&self, commands: &[String], cwd: &Path) -> Result<Vec<CommandOutcome>, CommandExecutorError>;
}

pub struct ShellCommandExecutor;

fn is_allowed(command: &str) -> Result<(), CommandExecutorError> {
    let Some(parts) = shlex::split(command) else {
        return Err(CommandExecutorError::Denied(command.to_string()));
    };
    let Some(program) = parts.first() else {
        return Err(CommandExecutorError::Denied(command.to_string()));
    };
    if command.contains('>') || command.contains('|') || command.contains(';') || command.contains('&') {
        return Err(CommandExecutorError::Denied(command.to_string()));
    }
    if DENY_PATTERNS.iter().any(|d| program == d) {
        return Err(CommandExecutorError::Denied(command.to_string()));
    }
    if !ALLOWED_COMMANDS.contains(&program.as_str()) {
        return Err(CommandExecutorError::NotAllowed(program.clone()));
    }
    if program == "git" {
        match parts.get(1) {
            Some(sub) if ALLOWED_GIT_SUBCOMMANDS.contains(&sub.as_str()) => {}
            _ => return Err(CommandExecutorError::NotAllowed(command.to_string())),
        }
    }
    Ok(())
}

#[async_trait]
impl CommandExecutorPort for ShellCommandExecutor {
    async fn run_all(&self, commands: &[String], cwd: &Path) -> Result<Vec<CommandOutcome>, CommandExecutorError> {
        let mut outcomes = Vec::with_capacity(commands.len());
        for command in commands {
            is_allowed(command)?;
            let mut parts = shlex::split(command).unwrap_or_default();
            if parts.is_empty() {
                continue;
            }
            let program = parts.remove(0);
            let mut child = tokio::process::Command::new(&program)
                .args(&parts)
                .current_dir(cwd)
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| CommandExecutorError::Denied(format!("{command}: {e}")))?;

            let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
                .await
                .map_err(|_| CommandExecutorError::Denied(format!("{command}: timed out")))?
                .map_err(|e| CommandExecutorError::Denied(format!("{command}: {e}")))?;

            let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
            stdout.truncate(MAX_OUTPUT_BYTES);
            stderr.truncate(MAX_OUTPUT_BYTES);

            outcomes.push(CommandOutcome {
                command: command.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_allowed_readonly_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let executor = ShellCommandExecutor;
        let out = executor
            .run_all(&["ls".to_string()], dir.path())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].exit_code, 0);
        assert!(out[0].stdout.contains("a.txt"));
    }

    #[tokio::test]
    async fn rejects_disallowed_command() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellCommandExecutor;
        let err = executor
            .run_all(&["rm -rf /".to_string()], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandExecutorError::Denied(_)));
    }

    #[tokio::test]
    async fn rejects_redirection_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellCommandExecutor;
        let err = executor
            .run_all(&["cat a.txt > b.txt".to_string()], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandExecutorError::Denied(_)));
    }

    #[tokio::test]
    async fn allows_readonly_git_subcommand_only() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellCommandExecutor;
        let err = executor
            .run_all(&["git push".to_string()], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandExecutorError::NotAllowed(_)));
    }
}
