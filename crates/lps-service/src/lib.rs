//! Application service: the multi-step operations that couple strategies,
//! the store, the job queue, and the cache.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use lps_cache::{keys, Cache, TTL_STATS};
use lps_countries::StrategyRegistry;
use lps_db::{
    EnqueueJob, LoanFilter, LoanOrder, LoanRow, LoanStatistics, NewLoan, StatusHistoryRow,
};
use lps_pii::PiiCodec;
use lps_schemas::{BankingInfo, LoanStatus};

mod error;
mod transitions;

pub use error::ServiceError;
pub use transitions::{allowed_transitions, can_transition};

pub const QUEUE_RISK: &str = "risk_evaluation";
pub const QUEUE_AUDIT: &str = "audit";
pub const QUEUE_NOTIFICATIONS: &str = "notifications";

#[derive(Debug, Clone)]
pub struct CreateApplication {
    pub country_code: String,
    pub document_type: String,
    pub document_number: String,
    pub full_name: String,
    pub amount_requested: Decimal,
    pub monthly_income: Decimal,
    /// User creating the application, when authenticated.
    pub actor_id: Option<Uuid>,
}

/// Orchestrates application creation and status transitions.
///
/// Holds shared process-scoped resources; cheap to clone.
#[derive(Clone)]
pub struct LoanService {
    pool: PgPool,
    registry: Arc<StrategyRegistry>,
    codec: PiiCodec,
    cache: Cache,
}

impl LoanService {
    pub fn new(pool: PgPool, registry: Arc<StrategyRegistry>, codec: PiiCodec, cache: Cache) -> Self {
        Self {
            pool,
            registry,
            codec,
            cache,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn codec(&self) -> &PiiCodec {
        &self.codec
    }

    /// Create an application: strategy validation and scoring, duplicate
    /// check, PII sealing, persist, enqueue follow-up jobs.
    pub async fn create_application(
        &self,
        req: CreateApplication,
    ) -> Result<LoanRow, ServiceError> {
        let country_code = req.country_code.to_uppercase();
        info!(
            country = %country_code,
            document_type = %req.document_type,
            amount = %req.amount_requested,
            "creating loan application"
        );

        let Some(strategy) = self.registry.get(&country_code) else {
            return Err(ServiceError::CountryNotSupported {
                country_code,
                supported: self.registry.country_codes().iter().map(|s| s.to_string()).collect(),
            });
        };

        if req.amount_requested <= Decimal::ZERO {
            return Err(ServiceError::validation(
                "Validation failed",
                vec!["amount_requested must be greater than zero".to_string()],
            ));
        }
        if req.monthly_income < Decimal::ZERO {
            return Err(ServiceError::validation(
                "Validation failed",
                vec!["monthly_income must not be negative".to_string()],
            ));
        }

        let doc_result = strategy.validate_document(&req.document_type, &req.document_number);
        if !doc_result.is_valid {
            warn!(errors = ?doc_result.errors, "document validation failed");
            return Err(ServiceError::validation(
                "Document validation failed",
                doc_result.errors.clone(),
            ));
        }

        // Provider failures never fail the request; business rules see the
        // synthetic snapshot and usually force review.
        let banking_info = match strategy
            .fetch_banking_info(&req.document_type, &req.document_number, &req.full_name)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "banking provider unavailable, continuing");
                BankingInfo::unavailable(&country_code, &e.to_string())
            }
        };

        let rules_result = strategy.validate_business_rules(
            req.amount_requested,
            req.monthly_income,
            Some(&banking_info),
        );
        let combined = doc_result.merge(rules_result);
        if !combined.is_valid {
            warn!(errors = ?combined.errors, "business rules validation failed");
            return Err(ServiceError::validation(
                "Business rules validation failed",
                combined.errors.clone(),
            ));
        }

        let risk_score = strategy.calculate_risk_score(
            req.amount_requested,
            req.monthly_income,
            Some(&banking_info),
        );

        // Duplicate active application check via the document hash.
        let document_hash = lps_pii::hash_document(&req.document_number, &country_code);
        let existing =
            lps_db::find_by_document_hash(&self.pool, &document_hash, Some(&country_code)).await?;
        if let Some(existing) = existing {
            if existing.status.is_active() {
                return Err(ServiceError::validation(
                    "An active application already exists for this document",
                    vec!["duplicate_application".to_string()],
                ));
            }
        }

        let new_loan = NewLoan {
            country_code: country_code.clone(),
            document_type: req.document_type.to_uppercase(),
            document_number: self.codec.encrypt(&req.document_number)?,
            document_hash,
            full_name: self.codec.encrypt(&req.full_name)?,
            amount_requested: req.amount_requested,
            monthly_income: req.monthly_income,
            currency: strategy.currency().to_string(),
            risk_score: Some(risk_score),
            requires_review: combined.requires_review,
            banking_info: Some(banking_info.to_value()),
            extra_data: json!({
                "validation_warnings": combined.warnings,
                "risk_factors": combined.risk_factors,
            }),
        };

        let loan = lps_db::create_loan(&self.pool, &new_loan).await?;
        info!(
            loan_id = %loan.id,
            risk_score,
            requires_review = combined.requires_review,
            "loan application created"
        );

        // Applications flagged for review jump the risk queue.
        lps_db::enqueue(
            &self.pool,
            &EnqueueJob::new(
                QUEUE_RISK,
                json!({
                    "loan_id": loan.id.to_string(),
                    "country_code": country_code,
                    "amount_requested": req.amount_requested.to_string(),
                    "risk_score": risk_score,
                }),
            )
            .with_priority(if combined.requires_review { 1 } else { 0 }),
        )
        .await?;

        // The insert trigger enqueues a CREATE audit job as well; both
        // sources are kept (see DESIGN.md).
        lps_db::enqueue(
            &self.pool,
            &EnqueueJob::new(
                QUEUE_AUDIT,
                json!({
                    "entity_type": "loan_application",
                    "entity_id": loan.id.to_string(),
                    "action": "CREATE",
                    "actor_id": req.actor_id.map(|id| id.to_string()),
                    "changes": {
                        "status": {"old": null, "new": LoanStatus::Pending.as_str()},
                    },
                }),
            ),
        )
        .await?;

        Ok(loan)
    }

    /// Apply a status transition after checking it against the lifecycle
    /// graph, then fan out audit/notification jobs and invalidate caches.
    pub async fn transition_status(
        &self,
        loan_id: Uuid,
        new_status: LoanStatus,
        changed_by: Option<Uuid>,
        reason: Option<&str>,
    ) -> Result<LoanRow, ServiceError> {
        let loan = lps_db::fetch_loan(&self.pool, loan_id)
            .await?
            .ok_or(ServiceError::LoanNotFound(loan_id))?;

        let current = loan.status;
        if !can_transition(current, new_status) {
            let allowed: Vec<&str> = allowed_transitions(current)
                .iter()
                .map(|s| s.as_str())
                .collect();
            return Err(ServiceError::validation(
                format!(
                    "Cannot transition from {} to {}",
                    current.as_str(),
                    new_status.as_str()
                ),
                vec![format!("Invalid status transition. Allowed: {allowed:?}")],
            ));
        }

        let updated = lps_db::update_status(
            &self.pool,
            loan_id,
            new_status,
            changed_by,
            reason,
            None,
        )
        .await?
        .ok_or(ServiceError::LoanNotFound(loan_id))?;

        info!(
            loan_id = %loan_id,
            from = current.as_str(),
            to = new_status.as_str(),
            "loan status updated"
        );

        lps_db::enqueue(
            &self.pool,
            &EnqueueJob::new(
                QUEUE_AUDIT,
                json!({
                    "entity_type": "loan_application",
                    "entity_id": loan_id.to_string(),
                    "action": "STATUS_CHANGE",
                    "actor_id": changed_by.map(|id| id.to_string()),
                    "changes": {
                        "status": {"old": current.as_str(), "new": new_status.as_str()},
                    },
                }),
            ),
        )
        .await?;

        if matches!(new_status, LoanStatus::Approved | LoanStatus::Rejected) {
            lps_db::enqueue(
                &self.pool,
                &EnqueueJob::new(
                    QUEUE_NOTIFICATIONS,
                    json!({
                        "loan_id": loan_id.to_string(),
                        "notification_type":
                            format!("loan_{}", new_status.as_str().to_lowercase()),
                        "country_code": updated.country_code,
                    }),
                )
                .with_priority(2),
            )
            .await?;
        }

        self.invalidate_loan_caches(loan_id, &updated.country_code).await;

        Ok(updated)
    }

    pub async fn get_loan(&self, loan_id: Uuid) -> Result<LoanRow, ServiceError> {
        let loan = lps_db::fetch_loan(&self.pool, loan_id)
            .await?
            .ok_or(ServiceError::LoanNotFound(loan_id))?;

        // Keep a lightweight summary warm for dashboards; the row above
        // stays authoritative.
        self.cache
            .set(
                &keys::loan(&loan_id.to_string()),
                &json!({
                    "id": loan.id.to_string(),
                    "country_code": loan.country_code,
                    "status": loan.status.as_str(),
                    "amount_requested": loan.amount_requested.to_string(),
                    "risk_score": loan.risk_score,
                }),
                lps_cache::TTL_LOAN,
            )
            .await;

        Ok(loan)
    }

    pub async fn list_loans(
        &self,
        filter: &LoanFilter,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<LoanRow>, i64), ServiceError> {
        let loans =
            lps_db::list_loans(&self.pool, filter, skip, limit, LoanOrder::CreatedAtDesc).await?;
        let total = lps_db::count_loans(&self.pool, filter).await?;
        Ok((loans, total))
    }

    pub async fn get_status_history(
        &self,
        loan_id: Uuid,
    ) -> Result<Vec<StatusHistoryRow>, ServiceError> {
        lps_db::fetch_loan(&self.pool, loan_id)
            .await?
            .ok_or(ServiceError::LoanNotFound(loan_id))?;
        Ok(lps_db::status_history(&self.pool, loan_id).await?)
    }

    pub async fn get_statistics(
        &self,
        country_code: Option<&str>,
    ) -> Result<LoanStatistics, ServiceError> {
        let cache_key = keys::loan_stats(country_code);
        if let Some(cached) = self.cache.get::<LoanStatistics>(&cache_key).await {
            return Ok(cached);
        }

        let stats = lps_db::loan_statistics(&self.pool, country_code).await?;
        self.cache.set(&cache_key, &stats, TTL_STATS).await;
        Ok(stats)
    }

    /// Drop every cached view derived from one loan: the loan itself,
    /// country and global statistics, and all list pages.
    async fn invalidate_loan_caches(&self, loan_id: Uuid, country_code: &str) {
        self.cache.delete(&keys::loan(&loan_id.to_string())).await;
        self.cache.delete(&keys::loan_stats(Some(country_code))).await;
        self.cache.delete(&keys::loan_stats(None)).await;
        self.cache.delete_pattern("loans:*").await;
    }
}
