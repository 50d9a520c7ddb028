//! Long-lived subscriber on the `loan_changes` database channel.
//!
//! The trigger on `loan_applications` emits one JSON notification per insert
//! or update in commit order; this task parses each payload and drives the
//! hub. Per loan, events reach observers in the order the database committed
//! them.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::hub::{LoanEvent, LoanHub};

pub const CHANNEL: &str = "loan_changes";

/// Payload emitted by `notify_loan_change()`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoanChangeNotification {
    pub operation: String,
    pub loan_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub old_status: Option<String>,
    #[serde(default)]
    pub new_status: Option<String>,
}

/// Derive the observer-facing event: a real status change (previous status
/// present and different) becomes `status_changed`, anything else a generic
/// `loan_updated`.
pub fn event_from_notification(n: &LoanChangeNotification) -> Option<LoanEvent> {
    if n.loan_id.is_empty() {
        return None;
    }
    let country = n.country_code.clone().unwrap_or_default();

    match (&n.old_status, &n.new_status) {
        (Some(old), Some(new)) if old != new => Some(LoanEvent::StatusChanged {
            loan_id: n.loan_id.clone(),
            country_code: country,
            old_status: Some(old.clone()),
            new_status: new.clone(),
        }),
        _ if n.operation == "INSERT" || n.operation == "UPDATE" => Some(LoanEvent::LoanUpdated {
            loan_id: n.loan_id.clone(),
            country_code: country,
            changes: match &n.new_status {
                Some(status) => serde_json::json!({"status": status}),
                None => serde_json::json!({}),
            },
        }),
        _ => None,
    }
}

/// Listen on `loan_changes` until the task is cancelled. Connection drops
/// are retried by the underlying listener; malformed payloads are logged and
/// skipped.
pub async fn run_listener(pool: PgPool, hub: LoanHub) -> Result<()> {
    let mut listener = PgListener::connect_with(&pool)
        .await
        .context("pg listener connect failed")?;
    listener
        .listen(CHANNEL)
        .await
        .context("pg listener subscribe failed")?;

    info!(channel = CHANNEL, "database change listener started");

    loop {
        let notification = listener
            .recv()
            .await
            .context("pg listener connection lost")?;

        let parsed: LoanChangeNotification = match serde_json::from_str(notification.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, payload = notification.payload(), "invalid notification payload");
                continue;
            }
        };

        debug!(loan_id = %parsed.loan_id, operation = %parsed.operation, "loan change received");

        if let Some(event) = event_from_notification(&parsed) {
            match &event {
                LoanEvent::StatusChanged {
                    loan_id,
                    country_code,
                    old_status,
                    new_status,
                } => {
                    info!(
                        loan_id = %loan_id,
                        old = old_status.as_deref().unwrap_or("-"),
                        new = %new_status,
                        "broadcasting status change"
                    );
                    hub.emit_status_changed(
                        loan_id,
                        country_code,
                        old_status.as_deref(),
                        new_status,
                    );
                }
                LoanEvent::LoanUpdated {
                    loan_id,
                    country_code,
                    changes,
                } => {
                    debug!(loan_id = %loan_id, "broadcasting loan update");
                    hub.emit_loan_updated(loan_id, country_code, changes.clone());
                }
                LoanEvent::LoanCreated {
                    loan_id,
                    country_code,
                    data,
                } => {
                    debug!(loan_id = %loan_id, "broadcasting loan creation");
                    hub.emit_loan_created(loan_id, country_code, data.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(
        operation: &str,
        old_status: Option<&str>,
        new_status: Option<&str>,
    ) -> LoanChangeNotification {
        LoanChangeNotification {
            operation: operation.to_string(),
            loan_id: "11111111-2222-3333-4444-555555555555".to_string(),
            country_code: Some("ES".to_string()),
            old_status: old_status.map(str::to_string),
            new_status: new_status.map(str::to_string),
        }
    }

    #[test]
    fn status_change_requires_previous_status() {
        // INSERT: old_status is null -> generic update, not status_changed.
        let insert = notification("INSERT", None, Some("PENDING"));
        match event_from_notification(&insert).unwrap() {
            LoanEvent::LoanUpdated { changes, .. } => assert_eq!(changes["status"], "PENDING"),
            other => panic!("expected loan_updated, got {other:?}"),
        }
    }

    #[test]
    fn real_transition_becomes_status_changed() {
        let update = notification("UPDATE", Some("PENDING"), Some("VALIDATING"));
        match event_from_notification(&update).unwrap() {
            LoanEvent::StatusChanged {
                old_status,
                new_status,
                ..
            } => {
                assert_eq!(old_status.as_deref(), Some("PENDING"));
                assert_eq!(new_status, "VALIDATING");
            }
            other => panic!("expected status_changed, got {other:?}"),
        }
    }

    #[test]
    fn same_status_update_is_a_generic_update() {
        let update = notification("UPDATE", Some("PENDING"), Some("PENDING"));
        assert!(matches!(
            event_from_notification(&update).unwrap(),
            LoanEvent::LoanUpdated { .. }
        ));
    }

    #[test]
    fn missing_loan_id_is_dropped() {
        let mut n = notification("UPDATE", Some("A"), Some("B"));
        n.loan_id = String::new();
        assert!(event_from_notification(&n).is_none());
    }

    #[test]
    fn trigger_payload_parses() {
        let raw = r#"{
            "operation": "UPDATE",
            "loan_id": "9be4a3e2-0000-0000-0000-000000000000",
            "country_code": "BR",
            "old_status": "PENDING",
            "new_status": "VALIDATING",
            "timestamp": "2025-01-01T00:00:00+00:00"
        }"#;
        let parsed: LoanChangeNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.operation, "UPDATE");
        assert_eq!(parsed.country_code.as_deref(), Some("BR"));
    }
}
