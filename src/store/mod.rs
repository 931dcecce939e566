//! External store ports (spec §6): State Store (DB0), Task Queue (DB2),
//! Circuit Breaker (DB1, TTL-keyed). `redis_store.rs` backs these with a
//! live `redis::aio::ConnectionManager`; `memory.rs` provides in-process
//! fakes the control loop's own tests run against.

pub mod memory;
pub mod redis_store;

use crate::error::{CircuitBreakerError, QueueError, StateStoreError};
use crate::state::Task;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait StateStorePort: Send + Sync {
    async fn get(&self) -> Result<Option<Value>, StateStoreError>;
    async fn set(&self, value: &Value) -> Result<(), StateStoreError>;
}

#[async_trait]
pub trait TaskQueuePort: Send + Sync {
    async fn lpop(&self) -> Result<Option<Task>, QueueError>;
    async fn rpush(&self, task: &Task) -> Result<(), QueueError>;
    async fn llen(&self) -> Result<u64, QueueError>;
    async fn lrange(&self, start: i64, stop: i64) -> Result<Vec<Task>, QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[async_trait]
pub trait CircuitBreakerStorePort: Send + Sync {
    /// Marks `provider` open for `ttl_seconds` starting now, recording
    /// `error_kind` and bumping the stored failure count.
    async fn open(&self, provider: &str, error_kind: &str, ttl_seconds: u64) -> Result<(), CircuitBreakerError>;

    /// True while the provider's TTL has not yet elapsed.
    async fn is_open(&self, provider: &str) -> Result<bool, CircuitBreakerError>;

    /// Clears a provider's open record (called on a successful dispatch that
    /// follows TTL expiry, closing the "single trial" per spec §4.4).
    async fn close(&self, provider: &str) -> Result<(), CircuitBreakerError>;
}
