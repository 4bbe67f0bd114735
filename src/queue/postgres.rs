use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::time::Instant;
use uuid::Uuid;

use super::{AckStatus, QueueError, TaskQueue};
use crate::dal::task_db;
use crate::domain::task::{QueueStats, Task};

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Durable task queue on top of the `tasks` table.
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, tasks: Vec<Task>) -> Result<u64, QueueError> {
        Ok(task_db::insert_tasks(&self.pool, &tasks).await?)
    }

    async fn dequeue_next(
        &self,
        timeout: Duration,
        worker_id: &str,
    ) -> Result<Option<Task>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = task_db::claim_next_task(&self.pool, worker_id).await? {
                return Ok(Some(task));
            }
            if Instant::now() + CLAIM_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
        }
    }

    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<AckStatus, QueueError> {
        match task_db::mark_task_completed(&self.pool, task_id, &result).await? {
            true => Ok(AckStatus::Acknowledged),
            false => Ok(AckStatus::NotProcessing),
        }
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<AckStatus, QueueError> {
        match task_db::mark_task_failed(&self.pool, task_id, error).await? {
            true => Ok(AckStatus::Acknowledged),
            false => Ok(AckStatus::NotProcessing),
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(task_db::get_counters(&self.pool).await?)
    }

    async fn recover_stalled(&self, max_age: Duration) -> Result<u64, QueueError> {
        Ok(task_db::fail_stalled_tasks(&self.pool, max_age.as_secs_f64()).await?)
    }

    async fn reset_counters(&self) -> Result<QueueStats, QueueError> {
        Ok(task_db::recompute_counters(&self.pool).await?)
    }

    async fn purge(&self) -> Result<(), QueueError> {
        Ok(task_db::purge_tasks(&self.pool).await?)
    }
}
