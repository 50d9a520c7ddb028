//! Durable job queue over `async_jobs`.
//!
//! Claims use a single `UPDATE … FROM (SELECT … FOR UPDATE SKIP LOCKED)`
//! statement so N workers polling one queue always claim N distinct rows;
//! a job can never be returned by two concurrent dequeues. Ownership recorded
//! in `locked_by`/`locked_at` is advisory once the stale-lock sweep has
//! released a row.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use lps_schemas::JobStatus;

const JOB_COLUMNS: &str = "id, queue_name, payload, status, priority, attempts, max_attempts, \
     error, scheduled_at, started_at, completed_at, locked_by, locked_at, created_at";

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub queue_name: String,
    pub payload: Value,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn job_from_row(row: &PgRow) -> Result<JobRow> {
    Ok(JobRow {
        id: row.try_get("id")?,
        queue_name: row.try_get("queue_name")?,
        payload: row.try_get("payload")?,
        status: JobStatus::parse(&row.try_get::<String, _>("status")?)?,
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        error: row.try_get("error")?,
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub queue_name: String,
    pub payload: Value,
    pub priority: i32,
    /// None = process immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_attempts: i32,
}

impl EnqueueJob {
    pub fn new(queue_name: &str, payload: Value) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            payload,
            priority: 0,
            scheduled_at: None,
            max_attempts: 3,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

pub async fn enqueue(pool: &PgPool, job: &EnqueueJob) -> Result<JobRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into async_jobs (queue_name, payload, priority, scheduled_at, max_attempts)
        values ($1, $2, $3, coalesce($4, now()), $5)
        returning {JOB_COLUMNS}
        "#
    ))
    .bind(&job.queue_name)
    .bind(&job.payload)
    .bind(job.priority)
    .bind(job.scheduled_at)
    .bind(job.max_attempts)
    .fetch_one(pool)
    .await
    .context("enqueue failed")?;

    job_from_row(&row)
}

/// Atomically claim the next due PENDING job on a queue.
///
/// Ordering is `priority desc, scheduled_at asc`; rows locked by concurrent
/// claims are skipped. On claim the row moves to RUNNING with
/// `locked_by`/`locked_at`/`started_at` set and `attempts` incremented.
/// Returns `None` when nothing is claimable.
pub async fn dequeue(pool: &PgPool, queue_name: &str, worker_id: &str) -> Result<Option<JobRow>> {
    let row = sqlx::query(&format!(
        r#"
        with next_job as (
            select id
            from async_jobs
            where queue_name = $1
              and status = 'PENDING'
              and scheduled_at <= now()
            order by priority desc, scheduled_at asc
            limit 1
            for update skip locked
        )
        update async_jobs
           set status     = 'RUNNING',
               locked_by  = $2,
               locked_at  = now(),
               started_at = now(),
               attempts   = attempts + 1
         where id in (select id from next_job)
        returning {JOB_COLUMNS}
        "#
    ))
    .bind(queue_name)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("dequeue failed")?;

    row.as_ref().map(job_from_row).transpose()
}

/// Mark a job COMPLETED and clear its lock. An optional result is merged into
/// the payload under the key `result`.
///
/// Ownership is not re-checked: a runner racing back after a stale-lock
/// release still completes the row (at-most-once holds per claimed attempt,
/// not per job).
pub async fn complete_job(pool: &PgPool, job_id: i64, result: Option<&Value>) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update async_jobs
           set status       = 'COMPLETED',
               completed_at = now(),
               locked_by    = null,
               locked_at    = null,
               payload      = case
                   when $2::jsonb is null then payload
                   else jsonb_set(payload, '{result}', $2::jsonb, true)
               end
         where id = $1
        returning id
        "#,
    )
    .bind(job_id)
    .bind(result)
    .fetch_optional(pool)
    .await
    .context("complete_job failed")?;

    Ok(row.is_some())
}

/// Record a failure. While attempts remain the job returns to PENDING with
/// `scheduled_at = now() + delay`; otherwise it becomes terminally FAILED.
pub async fn fail_job(
    pool: &PgPool,
    job_id: i64,
    error: &str,
    retry: bool,
    delay_seconds: i64,
) -> Result<Option<JobRow>> {
    let row = sqlx::query(&format!(
        r#"
        update async_jobs
           set error     = $2,
               locked_by = null,
               locked_at = null,
               status = case
                   when $3 and attempts < max_attempts then 'PENDING'
                   else 'FAILED'
               end,
               scheduled_at = case
                   when $3 and attempts < max_attempts
                       then now() + ($4 * interval '1 second')
                   else scheduled_at
               end,
               completed_at = case
                   when $3 and attempts < max_attempts then completed_at
                   else now()
               end
         where id = $1
        returning {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(error)
    .bind(retry)
    .bind(delay_seconds)
    .fetch_optional(pool)
    .await
    .context("fail_job failed")?;

    row.as_ref().map(job_from_row).transpose()
}

/// Cancel a job that has not started yet. Returns false when the job is
/// missing or no longer PENDING.
pub async fn cancel_job(pool: &PgPool, job_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update async_jobs
           set status = 'CANCELLED',
               completed_at = now()
         where id = $1
           and status = 'PENDING'
        returning id
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("cancel_job failed")?;

    Ok(row.is_some())
}

/// Return RUNNING jobs whose lock has outlived `timeout_seconds` to PENDING
/// so another worker can claim them. Handles workers that died mid-job.
pub async fn release_stale_locks(pool: &PgPool, timeout_seconds: i64) -> Result<i64> {
    let rows = sqlx::query(
        r#"
        update async_jobs
           set status    = 'PENDING',
               locked_by = null,
               locked_at = null,
               error     = 'Released due to stale lock'
         where status = 'RUNNING'
           and locked_at < now() - ($1 * interval '1 second')
        returning id
        "#,
    )
    .bind(timeout_seconds)
    .fetch_all(pool)
    .await
    .context("release_stale_locks failed")?;

    Ok(rows.len() as i64)
}

/// Delete terminal jobs older than the cutoff. Returns the number removed.
pub async fn cleanup_old_jobs(
    pool: &PgPool,
    days_to_keep: i64,
    statuses: &[JobStatus],
) -> Result<u64> {
    let status_strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let result = sqlx::query(
        r#"
        delete from async_jobs
        where status = any($1)
          and completed_at < now() - ($2 * interval '1 day')
        "#,
    )
    .bind(&status_strs)
    .bind(days_to_keep)
    .execute(pool)
    .await
    .context("cleanup_old_jobs failed")?;

    Ok(result.rows_affected())
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,
    pub by_status: Vec<(JobStatus, i64)>,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

pub async fn queue_stats(pool: &PgPool, queue_name: Option<&str>) -> Result<QueueStats> {
    let rows = sqlx::query(
        r#"
        select status, count(*)::bigint as count
        from async_jobs
        where ($1::varchar is null or queue_name = $1)
        group by status
        "#,
    )
    .bind(queue_name)
    .fetch_all(pool)
    .await
    .context("queue_stats counts failed")?;

    let mut by_status: Vec<(JobStatus, i64)> =
        JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for row in &rows {
        let status = JobStatus::parse(&row.try_get::<String, _>("status")?)?;
        let count: i64 = row.try_get("count")?;
        if let Some(slot) = by_status.iter_mut().find(|(s, _)| *s == status) {
            slot.1 = count;
        }
    }

    let oldest: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        select scheduled_at
        from async_jobs
        where ($1::varchar is null or queue_name = $1)
          and status = 'PENDING'
        order by scheduled_at asc
        limit 1
        "#,
    )
    .bind(queue_name)
    .fetch_optional(pool)
    .await
    .context("queue_stats oldest failed")?;

    Ok(QueueStats {
        queue_name: queue_name.unwrap_or("all").to_string(),
        by_status,
        oldest_pending_at: oldest.map(|(t,)| t),
    })
}

/// Recent jobs in a given state, newest first.
pub async fn jobs_by_status(
    pool: &PgPool,
    status: JobStatus,
    queue_name: Option<&str>,
    limit: i64,
) -> Result<Vec<JobRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {JOB_COLUMNS}
        from async_jobs
        where status = $1
          and ($2::varchar is null or queue_name = $2)
        order by created_at desc
        limit $3
        "#
    ))
    .bind(status.as_str())
    .bind(queue_name)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("jobs_by_status failed")?;

    rows.iter().map(job_from_row).collect()
}
