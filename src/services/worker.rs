use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dal::CompanyStore;
use crate::domain::task::TaskPayload;
use crate::queue::{AckStatus, QueueError, TaskQueue};

use super::verifier::EnrichmentReport;

const POLL_BACKOFF_BASE: Duration = Duration::from_millis(500);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(8);
const ACK_ATTEMPTS: u32 = 3;

/// The actual enrichment work, behind a trait so the loop around it can
/// be driven with a canned processor.
#[async_trait]
pub trait ProcessCompany: Send + Sync {
    async fn process(&self, company: &TaskPayload) -> anyhow::Result<EnrichmentReport>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub task_deadline: Duration,
    pub poll_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_deadline: Duration::from_secs(20),
            poll_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}_{}", host, std::process::id())
}

enum Ack {
    Complete(serde_json::Value),
    Fail(String),
}

pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn CompanyStore>,
    processor: Arc<dyn ProcessCompany>,
    worker_id: String,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn CompanyStore>,
        processor: Arc<dyn ProcessCompany>,
        worker_id: String,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            processor,
            worker_id,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims and processes tasks until `max_tasks` is hit or the queue
    /// stays empty for `idle_timeout`. Queue outages are retried with
    /// backoff rather than crashing a long run.
    pub async fn run(
        &self,
        max_tasks: Option<u64>,
        idle_timeout: Duration,
    ) -> Result<RunSummary, QueueError> {
        log::info!("worker {} starting", self.worker_id);
        let mut summary = RunSummary::default();
        let mut idle_since: Option<Instant> = None;
        let mut empty_polls: u32 = 0;
        let mut last_stats = Instant::now();

        loop {
            if let Some(max) = max_tasks {
                if summary.processed >= max {
                    log::info!("worker {} reached its limit of {} tasks", self.worker_id, max);
                    break;
                }
            }

            if last_stats.elapsed() >= self.config.stats_interval {
                if let Ok(stats) = self.queue.stats().await {
                    log::info!("worker {} sees queue {}", self.worker_id, stats);
                }
                last_stats = Instant::now();
            }

            // idleness is measured from the moment the queue first looked empty
            let poll_started = Instant::now();
            let claimed = match self
                .queue
                .dequeue_next(self.config.poll_timeout, &self.worker_id)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    log::error!("worker {} could not reach the queue: {}", self.worker_id, e);
                    empty_polls = empty_polls.saturating_add(1);
                    tokio::time::sleep(poll_backoff(empty_polls)).await;
                    continue;
                }
            };

            let Some(task) = claimed else {
                let idle_started = *idle_since.get_or_insert(poll_started);
                if idle_started.elapsed() >= idle_timeout {
                    log::info!(
                        "worker {} idle for {:?}, shutting down",
                        self.worker_id,
                        idle_timeout
                    );
                    break;
                }
                empty_polls = empty_polls.saturating_add(1);
                tokio::time::sleep(poll_backoff(empty_polls)).await;
                continue;
            };

            idle_since = None;
            empty_polls = 0;
            summary.processed += 1;

            log::info!(
                "worker {} took task {} for company {}",
                self.worker_id,
                task.task_id,
                task.company_id
            );

            let processed = tokio::time::timeout(
                self.config.task_deadline,
                self.processor.process(&task.company_data),
            )
            .await;

            match processed {
                Ok(Ok(report)) => {
                    match self
                        .store
                        .write_outcome(&task.company_id, &report.outcome, &self.worker_id)
                        .await
                    {
                        Ok(()) => {
                            summary.succeeded += 1;
                            let result = json!({
                                "outcome": report.outcome,
                                "evidence": report.evidence,
                            });
                            self.acknowledge(task.task_id, Ack::Complete(result)).await;
                        }
                        Err(e) => {
                            summary.failed += 1;
                            log::error!(
                                "worker {} could not persist company {}: {}",
                                self.worker_id,
                                task.company_id,
                                e
                            );
                            self.acknowledge(
                                task.task_id,
                                Ack::Fail(format!("store write failed: {}", e)),
                            )
                            .await;
                        }
                    }
                }
                Ok(Err(e)) => {
                    summary.failed += 1;
                    log::error!(
                        "worker {} failed on company {}: {:#}",
                        self.worker_id,
                        task.company_id,
                        e
                    );
                    self.acknowledge(task.task_id, Ack::Fail(format!("{:#}", e)))
                        .await;
                }
                Err(_) => {
                    summary.failed += 1;
                    log::error!(
                        "worker {} gave up on task {} after {:?}",
                        self.worker_id,
                        task.task_id,
                        self.config.task_deadline
                    );
                    self.acknowledge(
                        task.task_id,
                        Ack::Fail(format!(
                            "deadline exceeded after {:?}",
                            self.config.task_deadline
                        )),
                    )
                    .await;
                }
            }
        }

        log::info!(
            "worker {} done: {} processed, {} succeeded, {} failed",
            self.worker_id,
            summary.processed,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    async fn acknowledge(&self, task_id: Uuid, ack: Ack) {
        for attempt in 1..=ACK_ATTEMPTS {
            let result = match &ack {
                Ack::Complete(result) => self.queue.complete(task_id, result.clone()).await,
                Ack::Fail(error) => self.queue.fail(task_id, error).await,
            };
            match result {
                Ok(AckStatus::Acknowledged) => return,
                Ok(AckStatus::NotProcessing) => {
                    // someone recovered the task while we held it; the retry
                    // will redo the idempotent write, so just note it
                    log::warn!(
                        "worker {}: task {} was no longer processing when acknowledged",
                        self.worker_id,
                        task_id
                    );
                    return;
                }
                Err(e) if attempt < ACK_ATTEMPTS => {
                    log::warn!(
                        "worker {}: acknowledging task {} failed (attempt {}): {}",
                        self.worker_id,
                        task_id,
                        attempt,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
                Err(e) => {
                    log::error!(
                        "worker {}: giving up acknowledging task {}: {}",
                        self.worker_id,
                        task_id,
                        e
                    );
                }
            }
        }
    }
}

fn poll_backoff(empty_polls: u32) -> Duration {
    let exponent = empty_polls.saturating_sub(1).min(4);
    let base = (POLL_BACKOFF_BASE * 2u32.saturating_pow(exponent)).min(POLL_BACKOFF_MAX);
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::memory::MemoryCompanyStore;
    use crate::domain::company::{CompanyRecord, EnrichmentOutcome, EnrichmentStatus, SocialLinks};
    use crate::domain::evidence::ScoreEvidence;
    use crate::domain::task::Task;
    use crate::queue::memory::MemoryTaskQueue;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            task_deadline: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(40),
            stats_interval: Duration::from_secs(600),
        }
    }

    fn matched_report() -> EnrichmentReport {
        EnrichmentReport {
            outcome: EnrichmentOutcome {
                resolved_url: Some("https://acme.es".to_string()),
                url_reachable: true,
                http_status: Some(200),
                status_message: "accepted with score 115.0".to_string(),
                phones: vec!["912345678".to_string()],
                social_links: SocialLinks {
                    facebook: Some("https://facebook.com/acme".to_string()),
                    ..SocialLinks::default()
                },
                has_ecommerce: false,
            },
            evidence: Some(ScoreEvidence::none("https://acme.es")),
        }
    }

    struct StaticProcessor;

    #[async_trait]
    impl ProcessCompany for StaticProcessor {
        async fn process(&self, _company: &TaskPayload) -> anyhow::Result<EnrichmentReport> {
            Ok(matched_report())
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl ProcessCompany for FailingProcessor {
        async fn process(&self, _company: &TaskPayload) -> anyhow::Result<EnrichmentReport> {
            Err(anyhow::anyhow!("candidate probing exploded"))
        }
    }

    struct SlowProcessor;

    #[async_trait]
    impl ProcessCompany for SlowProcessor {
        async fn process(&self, _company: &TaskPayload) -> anyhow::Result<EnrichmentReport> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(matched_report())
        }
    }

    async fn seeded(
        count: usize,
    ) -> (Arc<MemoryTaskQueue>, Arc<MemoryCompanyStore>, Vec<String>) {
        let queue = Arc::new(MemoryTaskQueue::new());
        let store = Arc::new(MemoryCompanyStore::new());
        let mut ids = Vec::new();

        let mut tasks = Vec::new();
        for n in 0..count {
            let id = format!("company-{}", n);
            let record = CompanyRecord::unprocessed(&id, format!("Empresa {} SL", n));
            store.insert(record.clone()).await;
            tasks.push(Task::for_company(&record).unwrap());
            ids.push(id);
        }
        queue.enqueue(tasks).await.unwrap();
        (queue, store, ids)
    }

    fn worker(
        queue: Arc<MemoryTaskQueue>,
        store: Arc<MemoryCompanyStore>,
        processor: Arc<dyn ProcessCompany>,
        id: &str,
    ) -> Worker {
        Worker::new(queue, store, processor, id.to_string(), test_config())
    }

    #[tokio::test]
    async fn drains_the_queue_then_exits_on_idle_timeout() {
        let (queue, store, ids) = seeded(5).await;
        let w = worker(queue.clone(), store.clone(), Arc::new(StaticProcessor), "w1");

        let summary = w.run(None, Duration::from_millis(150)).await.unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.completed, 5);

        for id in ids {
            let record = store.get(&id).await.unwrap();
            assert_eq!(record.enrichment_status, EnrichmentStatus::Processed);
            assert_eq!(record.resolved_url.as_deref(), Some("https://acme.es"));
            assert_eq!(record.processed_by_worker.as_deref(), Some("w1"));
            assert!(record.last_updated_at.is_some());
        }
    }

    #[tokio::test]
    async fn completed_tasks_carry_the_result_payload() {
        let (queue, store, _) = seeded(1).await;
        let w = worker(queue.clone(), store, Arc::new(StaticProcessor), "w1");
        w.run(None, Duration::from_millis(100)).await.unwrap();

        let completed = queue.completed_tasks().await;
        assert_eq!(completed.len(), 1);
        let result = completed[0].result.as_ref().unwrap();
        assert_eq!(result["outcome"]["resolved_url"], "https://acme.es");
        assert!(result["evidence"].is_object());
        assert!(completed[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn processing_errors_fail_the_task_and_keep_going() {
        let (queue, store, ids) = seeded(3).await;
        let w = worker(queue.clone(), store.clone(), Arc::new(FailingProcessor), "w1");

        let summary = w.run(None, Duration::from_millis(100)).await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 3);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.processing, 0);

        let failed = queue.failed_tasks().await;
        assert!(failed[0].error.as_deref().unwrap().contains("exploded"));

        // the store was never touched
        for id in ids {
            let record = store.get(&id).await.unwrap();
            assert_eq!(record.enrichment_status, EnrichmentStatus::Unprocessed);
        }
    }

    #[tokio::test]
    async fn max_tasks_stops_the_loop_early() {
        let (queue, store, _) = seeded(5).await;
        let w = worker(queue.clone(), store, Arc::new(StaticProcessor), "w1");

        let summary = w.run(Some(2), Duration::from_millis(500)).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(queue.stats().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn deadline_overruns_fail_the_task() {
        let (queue, store, _) = seeded(1).await;
        let mut config = test_config();
        config.task_deadline = Duration::from_millis(50);
        let w = Worker::new(
            queue.clone(),
            store,
            Arc::new(SlowProcessor),
            "w1".to_string(),
            config,
        );

        let summary = w.run(None, Duration::from_millis(100)).await.unwrap();

        assert_eq!(summary.failed, 1);
        let failed = queue.failed_tasks().await;
        assert!(failed[0].error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn reprocessing_the_same_company_is_idempotent() {
        let queue = Arc::new(MemoryTaskQueue::new());
        let store = Arc::new(MemoryCompanyStore::new());
        let record = CompanyRecord::unprocessed("dup-1", "Empresa Duplicada SL");
        store.insert(record.clone()).await;

        // the same company enqueued twice, as a requeue after a stall would
        queue
            .enqueue(vec![
                Task::for_company(&record).unwrap(),
                Task::for_company(&record).unwrap(),
            ])
            .await
            .unwrap();

        let w = worker(queue.clone(), store.clone(), Arc::new(StaticProcessor), "w1");
        let summary = w.run(None, Duration::from_millis(100)).await.unwrap();

        assert_eq!(summary.processed, 2);
        let record = store.get("dup-1").await.unwrap();
        assert_eq!(record.phones, vec!["912345678"]);
        assert_eq!(record.social_links.count(), 1);
        assert_eq!(queue.stats().await.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn an_empty_queue_exits_within_the_idle_timeout() {
        let queue = Arc::new(MemoryTaskQueue::new());
        let store = Arc::new(MemoryCompanyStore::new());
        let w = worker(queue, store, Arc::new(StaticProcessor), "w1");

        let started = Instant::now();
        let summary = w.run(None, Duration::from_millis(120)).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn concurrent_workers_split_the_queue_without_overlap() {
        let (queue, store, _) = seeded(50).await;
        let processor: Arc<dyn ProcessCompany> = Arc::new(StaticProcessor);

        let w1 = worker(queue.clone(), store.clone(), processor.clone(), "w1");
        let w2 = worker(queue.clone(), store.clone(), processor.clone(), "w2");
        let w3 = worker(queue.clone(), store.clone(), processor.clone(), "w3");

        let idle = Duration::from_millis(200);
        let (s1, s2, s3) = tokio::join!(w1.run(None, idle), w2.run(None, idle), w3.run(None, idle));
        let (s1, s2, s3) = (s1.unwrap(), s2.unwrap(), s3.unwrap());

        // every task processed exactly once across the pool
        assert_eq!(s1.processed + s2.processed + s3.processed, 50);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = poll_backoff(1);
        assert!(first >= POLL_BACKOFF_BASE);
        assert!(first < POLL_BACKOFF_BASE * 2);

        let capped = poll_backoff(64);
        assert!(capped >= POLL_BACKOFF_MAX);
        assert!(capped <= POLL_BACKOFF_MAX + POLL_BACKOFF_MAX / 4);
    }

    #[test]
    fn worker_ids_mention_the_process() {
        let id = default_worker_id();
        assert!(id.contains('_'));
        assert!(id.ends_with(&std::process::id().to_string()));
    }
}
