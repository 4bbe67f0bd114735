use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{AckStatus, QueueError, TaskQueue};
use crate::domain::task::{QueueStats, Task};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Inner {
    pending: VecDeque<Task>,
    processing: HashMap<Uuid, Task>,
    completed: Vec<Task>,
    failed: Vec<Task>,
    counters: QueueStats,
}

/// Single-process queue with the same claim and acknowledgement semantics
/// as the Postgres one.
#[derive(Default)]
pub struct MemoryTaskQueue {
    inner: Mutex<Inner>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.inner.lock().await.completed.clone()
    }

    pub async fn failed_tasks(&self) -> Vec<Task> {
        self.inner.lock().await.failed.clone()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, tasks: Vec<Task>) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        let added = tasks.len() as u64;
        for task in tasks {
            inner.pending.push_back(task);
        }
        inner.counters.pending += added;
        Ok(added)
    }

    async fn dequeue_next(
        &self,
        timeout: Duration,
        worker_id: &str,
    ) -> Result<Option<Task>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(mut task) = inner.pending.pop_front() {
                    task.mark_processing(worker_id);
                    inner.counters.pending = inner.counters.pending.saturating_sub(1);
                    inner.counters.processing += 1;
                    let claimed = task.clone();
                    inner.processing.insert(task.task_id, task);
                    return Ok(Some(claimed));
                }
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<AckStatus, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.processing.remove(&task_id) {
            Some(mut task) => {
                task.mark_completed(result);
                inner.counters.processing = inner.counters.processing.saturating_sub(1);
                inner.counters.completed += 1;
                inner.completed.push(task);
                Ok(AckStatus::Acknowledged)
            }
            None => Ok(AckStatus::NotProcessing),
        }
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<AckStatus, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.processing.remove(&task_id) {
            Some(mut task) => {
                task.mark_failed(error);
                inner.counters.processing = inner.counters.processing.saturating_sub(1);
                inner.counters.failed += 1;
                inner.failed.push(task);
                Ok(AckStatus::Acknowledged)
            }
            None => Ok(AckStatus::NotProcessing),
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.inner.lock().await.counters)
    }

    async fn recover_stalled(&self, max_age: Duration) -> Result<u64, QueueError> {
        let age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let cutoff = Utc::now() - age;

        let mut inner = self.inner.lock().await;
        let stalled: Vec<Uuid> = inner
            .processing
            .values()
            .filter(|task| task.started_at.map(|at| at < cutoff).unwrap_or(false))
            .map(|task| task.task_id)
            .collect();

        let mut recovered = 0u64;
        for task_id in stalled {
            if let Some(mut task) = inner.processing.remove(&task_id) {
                task.mark_failed("stalled: worker never acknowledged");
                inner.counters.processing = inner.counters.processing.saturating_sub(1);
                inner.counters.failed += 1;
                inner.failed.push(task);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn reset_counters(&self) -> Result<QueueStats, QueueError> {
        let mut inner = self.inner.lock().await;
        let recounted = QueueStats {
            pending: inner.pending.len() as u64,
            processing: inner.processing.len() as u64,
            completed: inner.completed.len() as u64,
            failed: inner.failed.len() as u64,
        };
        inner.counters = recounted;
        Ok(recounted)
    }

    async fn purge(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.pending.clear();
        inner.processing.clear();
        inner.completed.clear();
        inner.failed.clear();
        inner.counters = QueueStats::default();
        Ok(())
    }
}
