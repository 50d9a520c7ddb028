//! Durable storage for the loan system: applications, status history, the
//! async job queue, audit log, webhook events, and users.
//!
//! All operations are free async functions over `&PgPool` using raw SQL;
//! row structs mirror the table shapes. Transactions are held only where an
//! invariant couples writes (status change + history row, create + initial
//! history row).

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod audit;
pub mod jobs;
pub mod loans;
pub mod users;
pub mod webhooks;

pub use audit::{insert_audit_log, list_audit_for_entity, AuditLogRow, NewAuditLog};
pub use jobs::{
    cancel_job, cleanup_old_jobs, complete_job, dequeue, enqueue, fail_job, jobs_by_status,
    queue_stats, release_stale_locks, EnqueueJob, JobRow, QueueStats,
};
pub use loans::{
    count_loans, create_loan, fetch_loan, find_by_document_hash, list_loans, loan_statistics,
    status_history, update_risk_score, update_status, LoanFilter, LoanOrder, LoanRow,
    LoanStatistics, NewLoan, StatusHistoryRow,
};
pub use users::{fetch_user, find_user_by_email, insert_user, touch_last_login, NewUser, UserRow};
pub use webhooks::{
    insert_webhook_event, list_webhook_events, set_webhook_loan, NewWebhookEvent, WebhookEventRow,
};

pub const ENV_DB_URL: &str = "LPS_DATABASE_URL";

/// Connect to Postgres using LPS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations (schema + triggers).
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests: connect via LPS_DATABASE_URL and
/// ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='loan_applications'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}
