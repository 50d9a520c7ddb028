//! Inbound provider event archive.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, source, event_type, payload, signature, processed, \
     processed_at, processing_error, loan_id, created_at";

#[derive(Debug, Clone)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub signature: Option<String>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub loan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

fn event_from_row(row: &PgRow) -> Result<WebhookEventRow> {
    Ok(WebhookEventRow {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        signature: row.try_get("signature")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
        processing_error: row.try_get("processing_error")?,
        loan_id: row.try_get("loan_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub signature: Option<String>,
    /// True when the event's effect was applied while handling the request.
    /// `processed = true` always carries a `processed_at`.
    pub processed: bool,
    pub processing_error: Option<String>,
    pub loan_id: Option<Uuid>,
}

pub async fn insert_webhook_event(
    pool: &PgPool,
    event: &NewWebhookEvent,
) -> Result<WebhookEventRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into webhook_events (
          source, event_type, payload, signature, processed, processed_at,
          processing_error, loan_id
        ) values (
          $1, $2, $3, $4, $5, case when $5 then now() else null end, $6, $7
        )
        returning {EVENT_COLUMNS}
        "#
    ))
    .bind(&event.source)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(&event.signature)
    .bind(event.processed)
    .bind(&event.processing_error)
    .bind(event.loan_id)
    .fetch_one(pool)
    .await
    .context("insert_webhook_event failed")?;

    event_from_row(&row)
}

/// Attach the resolved loan after the fact (reference matched later).
pub async fn set_webhook_loan(pool: &PgPool, event_id: Uuid, loan_id: Uuid) -> Result<()> {
    sqlx::query("update webhook_events set loan_id = $2 where id = $1")
        .bind(event_id)
        .bind(loan_id)
        .execute(pool)
        .await
        .context("set_webhook_loan failed")?;
    Ok(())
}

/// Recent events, newest first, optionally filtered by source and
/// processed flag.
pub async fn list_webhook_events(
    pool: &PgPool,
    source: Option<&str>,
    processed: Option<bool>,
    limit: i64,
) -> Result<Vec<WebhookEventRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {EVENT_COLUMNS}
        from webhook_events
        where ($1::varchar is null or source = $1)
          and ($2::boolean is null or processed = $2)
        order by created_at desc
        limit $3
        "#
    ))
    .bind(source)
    .bind(processed)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_webhook_events failed")?;

    rows.iter().map(event_from_row).collect()
}
