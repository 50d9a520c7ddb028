//! Audit worker: materialises queued audit jobs as journal rows.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use lps_db::{JobRow, NewAuditLog};
use lps_schemas::ActorType;
use lps_service::QUEUE_AUDIT;

use crate::JobHandler;

pub struct AuditHandler {
    pool: PgPool,
}

impl AuditHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Translate a queued audit payload into a journal row. The actor is USER
/// when an actor_id is present, SYSTEM otherwise.
pub fn audit_entry_from_payload(payload: &Value) -> Result<NewAuditLog> {
    let entity_type = payload
        .get("entity_type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("entity_type is required in payload"))?;
    let entity_id: Uuid = payload
        .get("entity_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("entity_id is required in payload"))?
        .parse()?;
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("action is required in payload"))?;

    let actor_id: Option<Uuid> = match payload.get("actor_id").and_then(Value::as_str) {
        Some(raw) => Some(raw.parse()?),
        None => None,
    };

    Ok(NewAuditLog {
        entity_type: entity_type.to_string(),
        entity_id,
        action: action.to_string(),
        actor_id,
        actor_type: if actor_id.is_some() {
            ActorType::User
        } else {
            ActorType::System
        },
        changes: payload.get("changes").cloned(),
        ip_address: payload
            .get("ip_address")
            .and_then(Value::as_str)
            .map(str::to_string),
        user_agent: payload
            .get("user_agent")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl JobHandler for AuditHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_AUDIT
    }

    // Audit rows should land quickly; poll faster than the other queues.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn process(&self, job: &JobRow) -> Result<Value> {
        let entry = audit_entry_from_payload(&job.payload)?;
        debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            action = %entry.action,
            "writing audit log"
        );

        let audit_log_id = lps_db::insert_audit_log(&self.pool, &entry).await?;

        Ok(json!({
            "audit_log_id": audit_log_id,
            "entity_type": entry.entity_type,
            "entity_id": entry.entity_id.to_string(),
            "action": entry.action,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_with_actor_is_a_user_action() {
        let actor = Uuid::new_v4();
        let payload = json!({
            "entity_type": "loan_application",
            "entity_id": Uuid::new_v4().to_string(),
            "action": "STATUS_CHANGE",
            "actor_id": actor.to_string(),
            "changes": {"status": {"old": "PENDING", "new": "VALIDATING"}},
        });

        let entry = audit_entry_from_payload(&payload).unwrap();
        assert_eq!(entry.actor_id, Some(actor));
        assert!(matches!(entry.actor_type, ActorType::User));
        assert_eq!(entry.action, "STATUS_CHANGE");
        assert!(entry.changes.is_some());
    }

    #[test]
    fn payload_without_actor_is_a_system_action() {
        // Shape produced by the database trigger.
        let payload = json!({
            "entity_type": "loan_application",
            "entity_id": Uuid::new_v4().to_string(),
            "action": "CREATE",
            "old_status": null,
            "new_status": "PENDING",
        });

        let entry = audit_entry_from_payload(&payload).unwrap();
        assert!(entry.actor_id.is_none());
        assert!(matches!(entry.actor_type, ActorType::System));
    }

    #[test]
    fn missing_required_fields_error() {
        assert!(audit_entry_from_payload(&json!({"action": "CREATE"})).is_err());
        assert!(audit_entry_from_payload(&json!({
            "entity_type": "loan_application",
            "entity_id": "not-a-uuid",
            "action": "CREATE",
        }))
        .is_err());
    }
}
