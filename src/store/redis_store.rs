//! Redis-backed implementations of the store ports.
//!
//! DB0 holds the state document under `state_key` (default
//! `supervisor:state`), DB2 holds the task queue as a list under
//! `queue_name` (default `tasks`), DB1 holds circuit-breaker entries with a
//! `PEXPIRE`/`SET ... EX` TTL per provider. Connections are built from a
//! single base URL with the db index swapped in, the way `redis::Client`
//! addresses are `redis://host:port/<db>`.

use super::{CircuitBreakerStorePort, StateStorePort, TaskQueuePort};
use crate::error::{CircuitBreakerError, QueueError, StateStoreError};
use crate::state::Task;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

pub struct RedisStateStore {
    conn: ConnectionManager,
    state_key: String,
}

impl RedisStateStore {
    pub fn new(conn: ConnectionManager, state_key: impl Into<String>) -> Self {
        RedisStateStore {
            conn,
            state_key: state_key.into(),
        }
    }
}

#[async_trait]
impl StateStorePort for RedisStateStore {
    async fn get(&self) -> Result<Option<Value>, StateStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&self.state_key)
            .await
            .map_err(|e| StateStoreError::Unreachable(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(StateStoreError::from))
            .transpose()
    }

    async fn set(&self, value: &Value) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        let _: () = conn
            .set(&self.state_key, raw)
            .await
            .map_err(|e| StateStoreError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    queue_name: String,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager, queue_name: impl Into<String>) -> Self {
        RedisTaskQueue {
            conn,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl TaskQueuePort for RedisTaskQueue {
    async fn lpop(&self) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .lpop(&self.queue_name, None)
            .await
            .map_err(|e| QueueError::Unreachable(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn rpush(&self, task: &Task) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(task)?;
        let _: () = conn
            .rpush(&self.queue_name, raw)
            .await
            .map_err(|e| QueueError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn llen(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.llen(&self.queue_name)
            .await
            .map_err(|e| QueueError::Unreachable(e.to_string()))
    }

    async fn lrange(&self, start: i64, stop: i64) -> Result<Vec<Task>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(&self.queue_name, start as isize, stop as isize)
            .await
            .map_err(|e| QueueError::Unreachable(e.to_string()))?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .collect()
    }
}

pub struct RedisCircuitBreakerStore {
    conn: ConnectionManager,
}

impl RedisCircuitBreakerStore {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisCircuitBreakerStore { conn }
    }

    fn key(provider: &str) -> String {
        format!("circuit_breaker:{provider}")
    }
}

#[async_trait]
impl CircuitBreakerStorePort for RedisCircuitBreakerStore {
    async fn open(&self, provider: &str, error_kind: &str, ttl_seconds: u64) -> Result<(), CircuitBreakerError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::key(provider), error_kind, ttl_seconds)
            .await
            .map_err(|e| CircuitBreakerError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn is_open(&self, provider: &str) -> Result<bool, CircuitBreakerError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(Self::key(provider))
            .await
            .map_err(|e| CircuitBreakerError::Unreachable(e.to_string()))?;
        Ok(exists)
    }

    async fn close(&self, provider: &str) -> Result<(), CircuitBreakerError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(Self::key(provider))
            .await
            .map_err(|e| CircuitBreakerError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

/// Builds a connection to `base_url` (expected like `redis://127.0.0.1:6379`)
/// against database index `db`, matching the DB0/DB1/DB2 split in §6.
pub async fn connect(base_url: &str, db: u8) -> anyhow::Result<ConnectionManager> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), db);
    let client = redis::Client::open(url)?;
    let conn = client.get_connection_manager().await?;
    Ok(conn)
}
