use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::dal::CompanyStore;
use crate::domain::task::Task;
use crate::queue::TaskQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub fetched: u64,
    pub enqueued: u64,
    pub skipped: u64,
    pub recovered: u64,
}

/// Loads unprocessed companies from the store and turns them into
/// pending tasks, sweeping stalled claims back first.
pub struct Enqueuer {
    store: Arc<dyn CompanyStore>,
    queue: Arc<dyn TaskQueue>,
    stall_threshold: Duration,
}

impl Enqueuer {
    pub fn new(
        store: Arc<dyn CompanyStore>,
        queue: Arc<dyn TaskQueue>,
        stall_threshold: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            stall_threshold,
        }
    }

    pub async fn run(&self, batch_size: i64, reset: bool) -> anyhow::Result<EnqueueSummary> {
        let mut summary = EnqueueSummary::default();

        if reset {
            log::warn!("purging the task queue before enqueueing");
            self.queue.purge().await.context("Failed to purge queue")?;
        }

        summary.recovered = self
            .queue
            .recover_stalled(self.stall_threshold)
            .await
            .context("Failed to recover stalled tasks")?;
        if summary.recovered > 0 {
            log::warn!("requeued {} stalled tasks as failed", summary.recovered);
        }

        let records = self
            .store
            .fetch_unprocessed(batch_size)
            .await
            .context("Failed to fetch unprocessed companies")?;
        summary.fetched = records.len() as u64;

        let mut tasks = Vec::with_capacity(records.len());
        for record in &records {
            match Task::for_company(record) {
                Ok(task) => tasks.push(task),
                Err(reason) => {
                    summary.skipped += 1;
                    log::warn!("skipping company: {}", reason);
                }
            }
        }

        if !tasks.is_empty() {
            summary.enqueued = self
                .queue
                .enqueue(tasks)
                .await
                .context("Failed to enqueue tasks")?;
        }

        log::info!(
            "enqueue run: {} fetched, {} enqueued, {} skipped, {} recovered",
            summary.fetched,
            summary.enqueued,
            summary.skipped,
            summary.recovered
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::memory::MemoryCompanyStore;
    use crate::domain::company::CompanyRecord;
    use crate::queue::memory::MemoryTaskQueue;

    fn enqueuer(store: Arc<MemoryCompanyStore>, queue: Arc<MemoryTaskQueue>) -> Enqueuer {
        Enqueuer::new(store, queue, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn enqueues_every_valid_company() {
        let store = Arc::new(MemoryCompanyStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        for n in 0..3 {
            store
                .insert(CompanyRecord::unprocessed(
                    format!("c-{}", n),
                    format!("Empresa {} SL", n),
                ))
                .await;
        }
        store.insert(CompanyRecord::unprocessed("c-bad", "  ")).await;

        let summary = enqueuer(store, queue.clone())
            .run(100, false)
            .await
            .unwrap();

        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.enqueued, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(queue.stats().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn batch_size_limits_the_pull() {
        let store = Arc::new(MemoryCompanyStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        for n in 0..10 {
            store
                .insert(CompanyRecord::unprocessed(
                    format!("c-{}", n),
                    format!("Empresa {} SL", n),
                ))
                .await;
        }

        let summary = enqueuer(store, queue).run(4, false).await.unwrap();
        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.enqueued, 4);
    }

    #[tokio::test]
    async fn reset_drops_whatever_was_queued_before() {
        let store = Arc::new(MemoryCompanyStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());

        let stale = CompanyRecord::unprocessed("old-1", "Vieja Empresa SL");
        queue
            .enqueue(vec![Task::for_company(&stale).unwrap()])
            .await
            .unwrap();

        store
            .insert(CompanyRecord::unprocessed("new-1", "Nueva Empresa SL"))
            .await;

        let summary = enqueuer(store, queue.clone()).run(100, true).await.unwrap();

        assert_eq!(summary.enqueued, 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total(), 1);
    }

    #[tokio::test]
    async fn stalled_claims_are_swept_before_refilling() {
        let store = Arc::new(MemoryCompanyStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());

        let record = CompanyRecord::unprocessed("c-1", "Empresa Colgada SL");
        queue
            .enqueue(vec![Task::for_company(&record).unwrap()])
            .await
            .unwrap();
        queue
            .dequeue_next(Duration::ZERO, "dead_worker")
            .await
            .unwrap()
            .unwrap();

        // a zero threshold makes the in-flight claim count as stalled
        let summary = Enqueuer::new(store, queue.clone(), Duration::ZERO)
            .run(100, false)
            .await
            .unwrap();

        assert_eq!(summary.recovered, 1);
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }
}
