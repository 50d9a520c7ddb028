//! Risk evaluation worker: turns a risk score into an automatic decision.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use lps_db::{EnqueueJob, JobRow};
use lps_schemas::LoanStatus;
use lps_service::{QUEUE_NOTIFICATIONS, QUEUE_RISK};

use crate::JobHandler;

/// Score at or below which an application is approved automatically.
pub const RISK_THRESHOLD_APPROVE: i64 = 300;
/// Score at or above which an application is rejected automatically.
pub const RISK_THRESHOLD_REJECT: i64 = 700;

/// The automatic-decision rule. Scores between the thresholds go to manual
/// review.
pub fn decide(risk_score: i64) -> (LoanStatus, String) {
    if risk_score <= RISK_THRESHOLD_APPROVE {
        (
            LoanStatus::Approved,
            format!("Auto-approved: risk_score {risk_score} <= {RISK_THRESHOLD_APPROVE}"),
        )
    } else if risk_score >= RISK_THRESHOLD_REJECT {
        (
            LoanStatus::Rejected,
            format!("Auto-rejected: risk_score {risk_score} >= {RISK_THRESHOLD_REJECT}"),
        )
    } else {
        (
            LoanStatus::InReview,
            format!("Manual review required: risk_score {risk_score} between thresholds"),
        )
    }
}

pub struct RiskHandler {
    pool: PgPool,
}

impl RiskHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for RiskHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_RISK
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn process(&self, job: &JobRow) -> Result<Value> {
        let loan_id: Uuid = job
            .payload
            .get("loan_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("loan_id is required in payload"))?
            .parse()?;
        let risk_score = job
            .payload
            .get("risk_score")
            .and_then(Value::as_i64)
            .unwrap_or(500);
        let country_code = job
            .payload
            .get("country_code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        info!(loan_id = %loan_id, risk_score, "evaluating loan");

        let loan = lps_db::fetch_loan(&self.pool, loan_id)
            .await?
            .ok_or_else(|| anyhow!("loan {loan_id} not found"))?;

        // Someone else (operator, webhook) already advanced this loan.
        if loan.status != LoanStatus::Pending {
            warn!(loan_id = %loan_id, status = loan.status.as_str(), "loan not PENDING, skipping");
            return Ok(json!({
                "skipped": true,
                "reason": format!("Loan status is {}", loan.status.as_str()),
            }));
        }

        let (new_status, decision_reason) = decide(risk_score);

        // Two separate transitions keep a visible PENDING -> VALIDATING ->
        // final trail in the history ledger.
        lps_db::update_status(
            &self.pool,
            loan_id,
            LoanStatus::Validating,
            None,
            Some("Risk evaluation started"),
            None,
        )
        .await?;

        lps_db::update_status(&self.pool, loan_id, new_status, None, Some(&decision_reason), None)
            .await?;

        info!(
            loan_id = %loan_id,
            from = loan.status.as_str(),
            to = new_status.as_str(),
            reason = %decision_reason,
            "automatic decision applied"
        );

        if matches!(new_status, LoanStatus::Approved | LoanStatus::Rejected) {
            lps_db::enqueue(
                &self.pool,
                &EnqueueJob::new(
                    QUEUE_NOTIFICATIONS,
                    json!({
                        "loan_id": loan_id.to_string(),
                        "notification_type":
                            format!("loan_{}", new_status.as_str().to_lowercase()),
                        "country_code": country_code,
                        "risk_score": risk_score,
                    }),
                )
                .with_priority(2),
            )
            .await?;
        }

        Ok(json!({
            "loan_id": loan_id.to_string(),
            "old_status": loan.status.as_str(),
            "new_status": new_status.as_str(),
            "risk_score": risk_score,
            "decision_reason": decision_reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_partition_the_score_range() {
        assert_eq!(decide(0).0, LoanStatus::Approved);
        assert_eq!(decide(300).0, LoanStatus::Approved);
        assert_eq!(decide(301).0, LoanStatus::InReview);
        assert_eq!(decide(500).0, LoanStatus::InReview);
        assert_eq!(decide(699).0, LoanStatus::InReview);
        assert_eq!(decide(700).0, LoanStatus::Rejected);
        assert_eq!(decide(1000).0, LoanStatus::Rejected);
    }

    #[test]
    fn decision_reason_names_the_threshold() {
        let (_, reason) = decide(250);
        assert!(reason.contains("250") && reason.contains("300"), "{reason}");
        let (_, reason) = decide(800);
        assert!(reason.contains("800") && reason.contains("700"), "{reason}");
    }
}
