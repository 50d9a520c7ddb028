//! Long-running queue consumers.
//!
//! Every worker shares the same loop: sweep stale locks on startup, then
//! claim one job at a time from its queue, process it, and record the
//! outcome. Failures retry with linear-in-attempts backoff (60 s × attempts)
//! until attempts run out. A watch channel signals graceful shutdown.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lps_db::JobRow;

pub mod audit;
pub mod risk;
pub mod webhook;

pub use audit::AuditHandler;
pub use risk::RiskHandler;
pub use webhook::WebhookHandler;

/// Seconds multiplied by the attempt count to schedule a retry.
pub const RETRY_BASE_SECONDS: i64 = 60;
/// A RUNNING job older than this is considered abandoned.
pub const LOCK_TIMEOUT_SECONDS: i64 = 300;

/// Retry delay for a job that has just failed its `attempts`-th attempt.
pub fn retry_delay_seconds(attempts: i32) -> i64 {
    RETRY_BASE_SECONDS * i64::from(attempts.max(1))
}

/// One queue's processing logic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue_name(&self) -> &'static str;

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Process one claimed job. The returned value is merged into the job
    /// payload under `result`; an error triggers the retry path.
    async fn process(&self, job: &JobRow) -> Result<Value>;
}

/// Run a handler's loop until `shutdown` flips to true.
pub async fn run_worker(
    pool: PgPool,
    handler: &dyn JobHandler,
    worker_id: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let queue = handler.queue_name();
    info!(worker_id, queue, "worker starting");

    // Recover jobs abandoned by a previous crash of any worker.
    let released = lps_db::release_stale_locks(&pool, LOCK_TIMEOUT_SECONDS).await?;
    if released > 0 {
        info!(worker_id, released, "released stale jobs on startup");
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        match lps_db::dequeue(&pool, queue, worker_id).await {
            Ok(Some(job)) => {
                process_one(&pool, handler, worker_id, &job).await;
            }
            Ok(None) => {
                // Idle: wait out the poll interval, but wake early on shutdown.
                tokio::select! {
                    _ = tokio::time::sleep(handler.poll_interval()) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(worker_id, queue, error = %e, "dequeue failed");
                tokio::time::sleep(handler.poll_interval()).await;
            }
        }
    }

    info!(worker_id, queue, "worker stopped");
    Ok(())
}

async fn process_one(pool: &PgPool, handler: &dyn JobHandler, worker_id: &str, job: &JobRow) {
    info!(worker_id, job_id = job.id, queue = %job.queue_name, "processing job");

    match handler.process(job).await {
        Ok(result) => {
            if let Err(e) = lps_db::complete_job(pool, job.id, Some(&result)).await {
                error!(worker_id, job_id = job.id, error = %e, "failed to mark job completed");
            } else {
                info!(worker_id, job_id = job.id, "job completed");
            }
        }
        Err(e) => {
            warn!(worker_id, job_id = job.id, error = %e, "job failed");
            let delay = retry_delay_seconds(job.attempts);
            if let Err(mark_err) =
                lps_db::fail_job(pool, job.id, &e.to_string(), true, delay).await
            {
                error!(worker_id, job_id = job.id, error = %mark_err, "failed to mark job failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_with_attempts() {
        assert_eq!(retry_delay_seconds(1), 60);
        assert_eq!(retry_delay_seconds(2), 120);
        assert_eq!(retry_delay_seconds(3), 180);
        // Attempt counts below 1 still wait one base interval.
        assert_eq!(retry_delay_seconds(0), 60);
    }
}
