//! In-process fakes of the three store ports, for control-loop unit tests.
//!
//! Substitutes the real backing store with something cheap and ephemeral,
//! without needing a live redis server for every test.

use super::{CircuitBreakerStorePort, StateStorePort, TaskQueuePort};
use crate::error::{CircuitBreakerError, QueueError, StateStoreError};
use crate::state::Task;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Option<Value>>,
}

#[async_trait]
impl StateStorePort for MemoryStateStore {
    async fn get(&self) -> Result<Option<Value>, StateStoreError> {
        Ok(self.inner.lock().unwrap().clone())
    }

    async fn set(&self, value: &Value) -> Result<(), StateStoreError> {
        *self.inner.lock().unwrap() = Some(value.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTaskQueue {
    inner: Mutex<VecDeque<Task>>,
}

impl MemoryTaskQueue {
    pub fn seed(tasks: Vec<Task>) -> Self {
        MemoryTaskQueue {
            inner: Mutex::new(tasks.into()),
        }
    }
}

#[async_trait]
impl TaskQueuePort for MemoryTaskQueue {
    async fn lpop(&self) -> Result<Option<Task>, QueueError> {
        Ok(self.inner.lock().unwrap().pop_front())
    }

    async fn rpush(&self, task: &Task) -> Result<(), QueueError> {
        self.inner.lock().unwrap().push_back(task.clone());
        Ok(())
    }

    async fn llen(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().unwrap().len() as u64)
    }

    async fn lrange(&self, start: i64, stop: i64) -> Result<Vec<Task>, QueueError> {
        let queue = self.inner.lock().unwrap();
        let len = queue.len() as i64;
        let norm = |i: i64| -> usize {
            if i < 0 {
                (len + i).max(0) as usize
            } else {
                i.min(len) as usize
            }
        };
        let (s, e) = (norm(start), norm(stop).min(len as usize));
        if s > e {
            return Ok(vec![]);
        }
        Ok(queue.iter().skip(s).take(e - s + 1).cloned().collect())
    }
}

struct BreakerRecord {
    opened_at: Instant,
    ttl: Duration,
    #[allow(dead_code)]
    error_kind: String,
    failure_count: u32,
}

#[derive(Default)]
pub struct MemoryCircuitBreakerStore {
    inner: Mutex<HashMap<String, BreakerRecord>>,
}

#[async_trait]
impl CircuitBreakerStorePort for MemoryCircuitBreakerStore {
    async fn open(&self, provider: &str, error_kind: &str, ttl_seconds: u64) -> Result<(), CircuitBreakerError> {
        let mut guard = self.inner.lock().unwrap();
        let failure_count = guard.get(provider).map(|r| r.failure_count + 1).unwrap_or(1);
        guard.insert(
            provider.to_string(),
            BreakerRecord {
                opened_at: Instant::now(),
                ttl: Duration::from_secs(ttl_seconds),
                error_kind: error_kind.to_string(),
                failure_count,
            },
        );
        Ok(())
    }

    async fn is_open(&self, provider: &str) -> Result<bool, CircuitBreakerError> {
        let guard = self.inner.lock().unwrap();
        Ok(match guard.get(provider) {
            Some(record) => record.opened_at.elapsed() < record.ttl,
            None => false,
        })
    }

    async fn close(&self, provider: &str) -> Result<(), CircuitBreakerError> {
        self.inner.lock().unwrap().remove(provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RetryPolicy, TaskType};

    fn task(id: &str) -> Task {
        Task {
            task_id: id.to_string(),
            intent: "do x".into(),
            task_type: TaskType::Coding,
            instructions: "do x".into(),
            acceptance_criteria: vec![],
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

    #[tokio::test]
    async fn fifo_queue_preserves_order() {
        let queue = MemoryTaskQueue::default();
        queue.rpush(&task("t-1")).await.unwrap();
        queue.rpush(&task("t-2")).await.unwrap();
        assert_eq!(queue.lpop().await.unwrap().unwrap().task_id, "t-1");
        assert_eq!(queue.llen().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn breaker_reports_open_until_ttl_elapses() {
        let breaker = MemoryCircuitBreakerStore::default();
        assert!(!breaker.is_open("GEMINI").await.unwrap());
        breaker.open("GEMINI", "resource_exhausted", 0).await.unwrap();
        // TTL of 0 elapses immediately.
        assert!(!breaker.is_open("GEMINI").await.unwrap());
    }

    #[tokio::test]
    async fn breaker_stays_open_within_ttl() {
        let breaker = MemoryCircuitBreakerStore::default();
        breaker.open("GEMINI", "rate_limit", 3600).await.unwrap();
        assert!(breaker.is_open("GEMINI").await.unwrap());
    }
}
