use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use huella::configuration::{get_configuration, Settings};
use huella::dal::{CompanyStore, PgCompanyStore};
use huella::queue::postgres::PgTaskQueue;
use huella::queue::TaskQueue;
use huella::services::{
    default_worker_id, CandidateGenerator, DnsResolver, Enqueuer, HttpFetcher, ProcessCompany,
    RateLimitConfig, RateLimiter, RunSummary, ScoreWeights, Verifier, Worker, WorkerConfig,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "huella", about = "Finds and verifies company websites")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load unprocessed companies into the task queue
    Enqueue {
        #[arg(long, default_value_t = 1000)]
        batch_size: i64,
        /// Purge all queues and counters first
        #[arg(long)]
        reset: bool,
    },
    /// Run worker loops until the queue stays empty
    Worker {
        #[arg(long)]
        max_tasks: Option<u64>,
        /// Seconds of continuous emptiness before exiting
        #[arg(long)]
        idle_timeout: Option<u64>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Print queue depth, optionally watching throughput
    Stats {
        #[arg(long)]
        watch: bool,
        /// Seconds between snapshots in watch mode
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Move stalled processing tasks back to failed
    Recover {
        /// Claim age in seconds before a task counts as stalled
        #[arg(long)]
        max_age: Option<u64>,
        /// Recompute counters from the actual task states afterwards
        #[arg(long)]
        reset_counters: bool,
    },
    /// Apply the bundled migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let configuration = get_configuration().expect("Failed to read configuration.");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(15 * 60)) // 15 minutes
        .max_lifetime(None)
        .connect_lazy_with(configuration.database.with_db());

    // the pool connects lazily; fail here instead of inside the first claim
    sqlx::query("select 1")
        .execute(&pool)
        .await
        .context("Failed to reach the database at startup")?;

    match cli.command {
        Command::Enqueue { batch_size, reset } => {
            enqueue(&configuration, pool, batch_size, reset).await
        }
        Command::Worker {
            max_tasks,
            idle_timeout,
            concurrency,
            worker_id,
        } => {
            run_workers(
                &configuration,
                pool,
                max_tasks,
                idle_timeout,
                concurrency,
                worker_id,
            )
            .await
        }
        Command::Stats { watch, interval } => show_stats(pool, watch, interval).await,
        Command::Recover {
            max_age,
            reset_counters,
        } => recover(&configuration, pool, max_age, reset_counters).await,
        Command::Migrate => migrate(pool).await,
    }
}

async fn enqueue(
    configuration: &Settings,
    pool: PgPool,
    batch_size: i64,
    reset: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(PgCompanyStore::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(pool));
    let enqueuer = Enqueuer::new(store, queue, configuration.queue.stall_threshold());

    let summary = enqueuer.run(batch_size, reset).await?;
    println!(
        "{} fetched, {} enqueued, {} skipped, {} stalled recovered",
        summary.fetched, summary.enqueued, summary.skipped, summary.recovered
    );
    Ok(())
}

async fn run_workers(
    configuration: &Settings,
    pool: PgPool,
    max_tasks: Option<u64>,
    idle_timeout: Option<u64>,
    concurrency: Option<usize>,
    worker_id: Option<String>,
) -> anyhow::Result<()> {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_minute: configuration.rate_limit.requests_per_minute,
        per_domain_per_minute: configuration.rate_limit.per_domain_per_minute,
    }));
    let fetcher = Arc::new(HttpFetcher::new(
        limiter,
        configuration.fetch.connect_timeout(),
        configuration.fetch.request_timeout(),
    ));
    let generator = CandidateGenerator::new(Arc::new(DnsResolver::new()));
    let processor: Arc<dyn ProcessCompany> =
        Arc::new(Verifier::new(fetcher, generator, ScoreWeights::default()));

    let store: Arc<dyn CompanyStore> = Arc::new(PgCompanyStore::new(pool.clone()));
    let queue: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool));

    let concurrency = concurrency.unwrap_or(configuration.worker.concurrency).max(1);
    let idle_timeout = idle_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| configuration.worker.idle_timeout());
    let base_id = worker_id.unwrap_or_else(default_worker_id);
    let config = WorkerConfig {
        task_deadline: configuration.worker.task_deadline(),
        poll_timeout: configuration.queue.poll_timeout(),
        stats_interval: configuration.worker.stats_interval(),
    };

    let mut handles = Vec::with_capacity(concurrency);
    for slot in 0..concurrency {
        let id = if concurrency > 1 {
            format!("{}-{}", base_id, slot)
        } else {
            base_id.clone()
        };
        let worker = Worker::new(queue.clone(), store.clone(), processor.clone(), id, config);
        handles.push(tokio::spawn(
            async move { worker.run(max_tasks, idle_timeout).await },
        ));
    }

    let mut total = RunSummary::default();
    for handle in handles {
        let summary = handle.await.context("worker task panicked")??;
        total.processed += summary.processed;
        total.succeeded += summary.succeeded;
        total.failed += summary.failed;
    }
    println!(
        "{} processed, {} succeeded, {} failed",
        total.processed, total.succeeded, total.failed
    );
    Ok(())
}

async fn show_stats(pool: PgPool, watch: bool, interval: u64) -> anyhow::Result<()> {
    let queue = PgTaskQueue::new(pool);
    let mut previous = queue.stats().await?;
    println!("{}", previous);
    if !watch {
        return Ok(());
    }

    let interval = Duration::from_secs(interval.max(1));
    loop {
        tokio::time::sleep(interval).await;
        let current = queue.stats().await?;
        let done = (current.completed + current.failed)
            .saturating_sub(previous.completed + previous.failed);
        let per_minute = done as f64 * 60.0 / interval.as_secs_f64();
        if per_minute > 0.0 {
            println!(
                "{} | {:.1} done/min, ~{:.0} min of backlog",
                current,
                per_minute,
                current.pending as f64 / per_minute
            );
        } else {
            println!("{} | idle", current);
        }
        previous = current;
    }
}

async fn recover(
    configuration: &Settings,
    pool: PgPool,
    max_age: Option<u64>,
    reset_counters: bool,
) -> anyhow::Result<()> {
    let queue = PgTaskQueue::new(pool);
    let max_age = max_age
        .map(Duration::from_secs)
        .unwrap_or_else(|| configuration.queue.stall_threshold());

    let recovered = queue.recover_stalled(max_age).await?;
    println!("{} stalled tasks recovered", recovered);

    if reset_counters {
        let stats = queue.reset_counters().await?;
        println!("counters recomputed: {}", stats);
    }
    Ok(())
}

async fn migrate(pool: PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    println!("migrations applied");
    Ok(())
}
