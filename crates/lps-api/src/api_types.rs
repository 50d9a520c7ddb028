//! Request and response DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use lps_db::{LoanRow, StatusHistoryRow, UserRow, WebhookEventRow};
use lps_pii::PiiCodec;
use lps_schemas::{LoanStatus, UserRole};

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<&UserRow> for UserResponse {
    fn from(user: &UserRow) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_active: user.is_active,
            is_verified: user.is_verified,
        }
    }
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoanCreateRequest {
    pub country_code: String,
    pub document_type: String,
    pub document_number: String,
    pub full_name: String,
    pub amount_requested: Decimal,
    pub monthly_income: Decimal,
}

/// Outbound application view: name decrypted, document number and hash never
/// serialised.
#[derive(Debug, Serialize)]
pub struct LoanResponse {
    pub id: Uuid,
    pub country_code: String,
    pub document_type: String,
    pub full_name: String,
    pub amount_requested: Decimal,
    pub monthly_income: Decimal,
    pub currency: String,
    pub status: LoanStatus,
    pub risk_score: Option<i32>,
    pub requires_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl LoanResponse {
    pub fn from_row(loan: &LoanRow, codec: &PiiCodec) -> Self {
        Self {
            id: loan.id,
            country_code: loan.country_code.clone(),
            document_type: loan.document_type.clone(),
            full_name: codec.decrypt_or_original(&loan.full_name),
            amount_requested: loan.amount_requested,
            monthly_income: loan.monthly_income,
            currency: loan.currency.clone(),
            status: loan.status,
            risk_score: loan.risk_score,
            requires_review: loan.requires_review,
            created_at: loan.created_at,
            updated_at: loan.updated_at,
            processed_at: loan.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoanDetailResponse {
    #[serde(flatten)]
    pub loan: LoanResponse,
    pub banking_info: Option<Value>,
    pub extra_data: Value,
}

#[derive(Debug, Serialize)]
pub struct LoanListResponse {
    pub items: Vec<LoanResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub pages: i64,
}

impl LoanListResponse {
    pub fn from_results(
        loans: &[LoanRow],
        total: i64,
        page: i64,
        page_size: i64,
        codec: &PiiCodec,
    ) -> Self {
        let pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items: loans
                .iter()
                .map(|loan| LoanResponse::from_row(loan, codec))
                .collect(),
            total,
            page,
            page_size,
            pages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoanListQuery {
    pub country_code: Option<String>,
    pub status: Option<LoanStatus>,
    pub requires_review: Option<bool>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

impl LoanListQuery {
    /// Clamp pagination to sane bounds (page >= 1, 1 <= page_size <= 100).
    pub fn clamped(&self) -> (i64, i64) {
        (self.page.max(1), self.page_size.clamp(1, 100))
    }
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoanStatusUpdateRequest {
    pub status: LoanStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusHistoryResponse {
    pub id: Uuid,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub changed_by: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&StatusHistoryRow> for StatusHistoryResponse {
    fn from(row: &StatusHistoryRow) -> Self {
        Self {
            id: row.id,
            previous_status: row.previous_status.clone(),
            new_status: row.new_status.clone(),
            changed_by: row.changed_by,
            reason: row.reason.clone(),
            created_at: row.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub event_id: Uuid,
    pub processed: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventsQuery {
    pub source: Option<String>,
    pub processed: Option<bool>,
    #[serde(default = "default_webhook_limit")]
    pub limit: i64,
}

fn default_webhook_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct WebhookEventResponse {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub loan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&WebhookEventRow> for WebhookEventResponse {
    fn from(row: &WebhookEventRow) -> Self {
        Self {
            id: row.id,
            source: row.source.clone(),
            event_type: row.event_type.clone(),
            processed: row.processed,
            processed_at: row.processed_at,
            processing_error: row.processing_error.clone(),
            loan_id: row.loan_id,
            created_at: row.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub database: String,
    pub cache: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_bounds() {
        let query = LoanListQuery {
            country_code: None,
            status: None,
            requires_review: None,
            page: 0,
            page_size: 1000,
        };
        assert_eq!(query.clamped(), (1, 100));
    }

    #[test]
    fn pages_round_up() {
        let response = LoanListResponse {
            items: Vec::new(),
            total: 41,
            page: 1,
            page_size: 20,
            pages: (41 + 19) / 20,
        };
        assert_eq!(response.pages, 3);
    }
}
