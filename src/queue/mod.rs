pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::task::{QueueStats, Task};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Terminal transitions are idempotent. A task that was already recovered
/// or acknowledged reports `NotProcessing` instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Acknowledged,
    NotProcessing,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Returns how many tasks were actually added.
    async fn enqueue(&self, tasks: Vec<Task>) -> Result<u64, QueueError>;

    /// Claims the oldest pending task, polling until `timeout` elapses.
    /// Every claim is exclusive; no two callers ever receive the same task.
    async fn dequeue_next(
        &self,
        timeout: Duration,
        worker_id: &str,
    ) -> Result<Option<Task>, QueueError>;

    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<AckStatus, QueueError>;

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<AckStatus, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Fails processing tasks whose claim is older than `max_age` so they
    /// show up in a later enqueue run instead of hanging forever.
    async fn recover_stalled(&self, max_age: Duration) -> Result<u64, QueueError>;

    /// Recounts every state from the task records and overwrites the counters.
    async fn reset_counters(&self) -> Result<QueueStats, QueueError>;

    async fn purge(&self) -> Result<(), QueueError>;
}
