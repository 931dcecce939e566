//! Error taxonomy (spec §7). Port-level leaf errors are `thiserror` enums;
//! call sites compose them into `anyhow::Result` the usual way a
//! lower-level error (e.g. `redis::RedisError`, `toml::de::Error`) gets
//! wrapped into a module-specific variant before bubbling up.

use thiserror::Error;

/// Fatal conditions: the control loop writes `status=HALTED` and exits
/// non-zero rather than attempting to continue.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("state document is missing")]
    StateMissing,
    #[error("state document is corrupt: {0}")]
    StateCorrupt(String),
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store unreachable: {0}")]
    Unreachable(String),
    #[error("state document failed to parse: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue unreachable: {0}")]
    Unreachable(String),
    #[error("queue entry failed to parse: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker store unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to append to log: {0}")]
    Append(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("all providers exhausted")]
    AllProvidersExhausted,
    #[error("provider '{0}' spawn failed: {1}")]
    Spawn(String, String),
}

#[derive(Debug, Error)]
pub enum CommandExecutorError {
    #[error("command '{0}' is not on the allow-list")]
    NotAllowed(String),
    #[error("command '{0}' matched a deny pattern")]
    Denied(String),
}
