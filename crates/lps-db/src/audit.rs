//! Append-only entity-change journal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use lps_schemas::ActorType;

#[derive(Debug, Clone)]
pub struct AuditLogRow {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_type: Option<String>,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub changes: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Insert one journal row; returns its id.
pub async fn insert_audit_log(pool: &PgPool, entry: &NewAuditLog) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into audit_logs (
          entity_type, entity_id, action, actor_id, actor_type, changes,
          ip_address, user_agent
        ) values ($1, $2, $3, $4, $5, $6, $7::inet, $8)
        returning id
        "#,
    )
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(&entry.action)
    .bind(entry.actor_id)
    .bind(entry.actor_type.as_str())
    .bind(&entry.changes)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .fetch_one(pool)
    .await
    .context("insert_audit_log failed")?;

    Ok(id)
}

/// Journal rows for one entity, oldest first.
pub async fn list_audit_for_entity(
    pool: &PgPool,
    entity_type: &str,
    entity_id: Uuid,
    limit: i64,
) -> Result<Vec<AuditLogRow>> {
    let rows = sqlx::query(
        r#"
        select id, entity_type, entity_id, action, actor_id, actor_type,
               changes, ip_address::text as ip_address, user_agent, created_at
        from audit_logs
        where entity_type = $1 and entity_id = $2
        order by created_at asc, id asc
        limit $3
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_audit_for_entity failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AuditLogRow {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            action: row.try_get("action")?,
            actor_id: row.try_get("actor_id")?,
            actor_type: row.try_get("actor_type")?,
            changes: row.try_get("changes")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}
