use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::task::{QueueStats, Task, TaskState};

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: Uuid,
    company_id: String,
    company_data: serde_json::Value,
    state: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

fn task_from_row(row: TaskRow) -> Result<Task, sqlx::Error> {
    let state = TaskState::parse(&row.state)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown task state: {}", row.state).into()))?;
    let company_data = serde_json::from_value(row.company_data)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Task {
        task_id: row.task_id,
        company_id: row.company_id,
        company_data,
        state,
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        worker_id: row.worker_id,
        result: row.result,
        error: row.error,
    })
}

async fn adjust_counter(
    con: &mut PgConnection,
    name: &str,
    delta: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into queue_counters
            (name, value)
        values
            ($1, $2)
        on conflict (name) do update set
            value = queue_counters.value + $2
        "#,
    )
    .bind(name)
    .bind(delta)
    .execute(&mut *con)
    .await?;

    Ok(())
}

pub async fn insert_tasks(pool: &PgPool, tasks: &[Task]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for task in tasks {
        let company_data = serde_json::to_value(&task.company_data)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let outcome = sqlx::query(
            r#"
            insert into tasks
                (task_id, company_id, company_data, state, created_at)
            values
                ($1, $2, $3, 'pending', $4)
            on conflict (task_id) do nothing
            "#,
        )
        .bind(task.task_id)
        .bind(&task.company_id)
        .bind(&company_data)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        inserted += outcome.rows_affected();
    }

    if inserted > 0 {
        adjust_counter(&mut tx, "pending", inserted as i64).await?;
    }
    tx.commit().await?;

    Ok(inserted)
}

/// Atomically move the oldest pending task to processing. `skip locked`
/// keeps concurrent workers from ever claiming the same row.
pub async fn claim_next_task(pool: &PgPool, worker_id: &str) -> Result<Option<Task>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        update tasks set
            state = 'processing',
            started_at = now(),
            worker_id = $1
        where task_id = (
            select task_id from tasks
            where state = 'pending'
            order by created_at
            limit 1
            for update skip locked
        )
        returning
            task_id, company_id, company_data, state, created_at,
            started_at, completed_at, worker_id, result, error
        "#,
    )
    .bind(worker_id)
    .fetch_optional(&mut *tx)
    .await?;

    match row {
        Some(row) => {
            adjust_counter(&mut tx, "pending", -1).await?;
            adjust_counter(&mut tx, "processing", 1).await?;
            tx.commit().await?;
            task_from_row(row).map(Some)
        }
        None => {
            tx.commit().await?;
            Ok(None)
        }
    }
}

pub async fn mark_task_completed(
    pool: &PgPool,
    task_id: Uuid,
    result: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let outcome = sqlx::query(
        r#"
        update tasks set
            state = 'completed',
            completed_at = now(),
            result = $2
        where
            task_id = $1 and state = 'processing'
        "#,
    )
    .bind(task_id)
    .bind(result)
    .execute(&mut *tx)
    .await?;

    let acknowledged = outcome.rows_affected() == 1;
    if acknowledged {
        adjust_counter(&mut tx, "processing", -1).await?;
        adjust_counter(&mut tx, "completed", 1).await?;
    }
    tx.commit().await?;

    Ok(acknowledged)
}

pub async fn mark_task_failed(
    pool: &PgPool,
    task_id: Uuid,
    error: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let outcome = sqlx::query(
        r#"
        update tasks set
            state = 'failed',
            completed_at = now(),
            error = $2
        where
            task_id = $1 and state = 'processing'
        "#,
    )
    .bind(task_id)
    .bind(error)
    .execute(&mut *tx)
    .await?;

    let acknowledged = outcome.rows_affected() == 1;
    if acknowledged {
        adjust_counter(&mut tx, "processing", -1).await?;
        adjust_counter(&mut tx, "failed", 1).await?;
    }
    tx.commit().await?;

    Ok(acknowledged)
}

pub async fn fail_stalled_tasks(pool: &PgPool, max_age_secs: f64) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let outcome = sqlx::query(
        r#"
        update tasks set
            state = 'failed',
            completed_at = now(),
            error = 'stalled: worker never acknowledged'
        where
            state = 'processing'
            and started_at < now() - make_interval(secs => $1)
        "#,
    )
    .bind(max_age_secs)
    .execute(&mut *tx)
    .await?;

    let recovered = outcome.rows_affected();
    if recovered > 0 {
        adjust_counter(&mut tx, "processing", -(recovered as i64)).await?;
        adjust_counter(&mut tx, "failed", recovered as i64).await?;
    }
    tx.commit().await?;

    Ok(recovered)
}

pub async fn get_counters(pool: &PgPool) -> Result<QueueStats, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64)>("select name, value from queue_counters")
        .fetch_all(pool)
        .await?;

    Ok(stats_from_rows(rows))
}

pub async fn recompute_counters(pool: &PgPool) -> Result<QueueStats, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        select
            state,
            count(*)
        from
            tasks
        group by
            state
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;
    let stats = stats_from_rows(rows);

    for (name, value) in [
        ("pending", stats.pending),
        ("processing", stats.processing),
        ("completed", stats.completed),
        ("failed", stats.failed),
    ] {
        sqlx::query(
            r#"
            insert into queue_counters
                (name, value)
            values
                ($1, $2)
            on conflict (name) do update set
                value = $2
            "#,
        )
        .bind(name)
        .bind(value as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(stats)
}

pub async fn purge_tasks(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("truncate table tasks").execute(&mut *tx).await?;
    sqlx::query("update queue_counters set value = 0")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

fn stats_from_rows(rows: Vec<(String, i64)>) -> QueueStats {
    let mut stats = QueueStats::default();
    for (name, value) in rows {
        let value = value.max(0) as u64;
        match name.as_str() {
            "pending" => stats.pending = value,
            "processing" => stats.processing = value,
            "completed" => stats.completed = value,
            "failed" => stats.failed = value,
            _ => {}
        }
    }
    stats
}
