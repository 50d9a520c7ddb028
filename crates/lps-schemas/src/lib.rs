use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// LoanStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a loan application.
///
/// Stored as TEXT in Postgres; `as_str`/`parse` round-trip the column value.
/// The allowed transition graph lives in `lps-service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    Validating,
    InReview,
    Approved,
    Rejected,
    Cancelled,
    Disbursed,
    Completed,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 8] = [
        LoanStatus::Pending,
        LoanStatus::Validating,
        LoanStatus::InReview,
        LoanStatus::Approved,
        LoanStatus::Rejected,
        LoanStatus::Cancelled,
        LoanStatus::Disbursed,
        LoanStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Validating => "VALIDATING",
            LoanStatus::InReview => "IN_REVIEW",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Rejected => "REJECTED",
            LoanStatus::Cancelled => "CANCELLED",
            LoanStatus::Disbursed => "DISBURSED",
            LoanStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(LoanStatus::Pending),
            "VALIDATING" => Ok(LoanStatus::Validating),
            "IN_REVIEW" => Ok(LoanStatus::InReview),
            "APPROVED" => Ok(LoanStatus::Approved),
            "REJECTED" => Ok(LoanStatus::Rejected),
            "CANCELLED" => Ok(LoanStatus::Cancelled),
            "DISBURSED" => Ok(LoanStatus::Disbursed),
            "COMPLETED" => Ok(LoanStatus::Completed),
            other => Err(anyhow!("invalid loan status: {}", other)),
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Rejected | LoanStatus::Cancelled | LoanStatus::Completed
        )
    }

    /// States that count as an active (in-flight) application for the
    /// duplicate-document check.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LoanStatus::Pending | LoanStatus::Validating | LoanStatus::InReview
        )
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Status of a durable queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(anyhow!("invalid job status: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// UserRole / ActorType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Analyst,
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Analyst => "ANALYST",
            UserRole::Viewer => "VIEWER",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ADMIN" => Ok(UserRole::Admin),
            "ANALYST" => Ok(UserRole::Analyst),
            "VIEWER" => Ok(UserRole::Viewer),
            other => Err(anyhow!("invalid user role: {}", other)),
        }
    }

    /// Approval/rejection of applications is gated to analysts and admins.
    pub fn can_approve_loans(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Analyst)
    }
}

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    User,
    System,
    Worker,
    Webhook,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "USER",
            ActorType::System => "SYSTEM",
            ActorType::Worker => "WORKER",
            ActorType::Webhook => "WEBHOOK",
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentType
// ---------------------------------------------------------------------------

/// Identity document kinds across the supported countries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    /// Spain — Documento Nacional de Identidad
    DNI,
    /// Spain — Número de Identidad de Extranjero
    NIE,
    /// Mexico — Clave Única de Registro de Población
    CURP,
    /// Colombia — Cédula de Ciudadanía
    CC,
    /// Colombia — Cédula de Extranjería
    CE,
    /// Brazil — Cadastro de Pessoas Físicas
    CPF,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::DNI => "DNI",
            DocumentType::NIE => "NIE",
            DocumentType::CURP => "CURP",
            DocumentType::CC => "CC",
            DocumentType::CE => "CE",
            DocumentType::CPF => "CPF",
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Outcome of a document or business-rule validation pass.
///
/// `risk_factors` accumulates per-country key/value evidence for audit; it is
/// persisted under the application's `extra_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub requires_review: bool,
    pub risk_factors: Map<String, Value>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            requires_review: false,
            risk_factors: Map::new(),
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_risk_factor(&mut self, key: &str, value: impl Into<Value>) {
        self.risk_factors.insert(key.to_string(), value.into());
    }

    /// Combine two results: valid iff both are, errors/warnings concatenated,
    /// risk factors merged (other wins on key collision).
    pub fn merge(mut self, other: ValidationResult) -> ValidationResult {
        self.is_valid = self.is_valid && other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.requires_review = self.requires_review || other.requires_review;
        self.risk_factors.extend(other.risk_factors);
        self
    }
}

// ---------------------------------------------------------------------------
// BankingInfo
// ---------------------------------------------------------------------------

/// Snapshot returned by a country's banking/credit-bureau provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankingInfo {
    pub provider_name: String,
    pub credit_score: Option<i32>,
    pub total_debt: Option<Decimal>,
    /// 0-100 scale.
    pub payment_history_score: Option<i32>,
    pub account_age_months: Option<i32>,
    pub has_defaults: bool,
    pub default_count: i32,
    pub monthly_obligations: Option<Decimal>,
    pub available_credit: Option<Decimal>,
    pub employment_verified: bool,
    pub income_verified: bool,
    #[serde(default)]
    pub raw_data: Map<String, Value>,
}

impl BankingInfo {
    /// Synthetic snapshot recorded when the provider call fails; business
    /// rules see the missing fields and typically flag manual review.
    pub fn unavailable(country_code: &str, error: &str) -> Self {
        let mut raw = Map::new();
        raw.insert("error".to_string(), Value::String(error.to_string()));
        Self {
            provider_name: format!("{country_code}_UNAVAILABLE"),
            raw_data: raw,
            ..Default::default()
        }
    }

    /// JSONB representation stored on the application row.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Inbound webhook wire contract
// ---------------------------------------------------------------------------

/// Payload POSTed by banking providers to `/webhooks/banking/{country}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankingWebhookPayload {
    pub event_type: String,
    /// Loan id (uuid) or document hash.
    pub loan_reference: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_status_round_trips_through_text() {
        for st in LoanStatus::ALL {
            assert_eq!(LoanStatus::parse(st.as_str()).unwrap(), st);
        }
        assert!(LoanStatus::parse("UNKNOWN").is_err());
    }

    #[test]
    fn loan_status_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&LoanStatus::InReview).unwrap();
        assert_eq!(json, "\"IN_REVIEW\"");
        let back: LoanStatus = serde_json::from_str("\"DISBURSED\"").unwrap();
        assert_eq!(back, LoanStatus::Disbursed);
    }

    #[test]
    fn terminal_and_active_sets_are_disjoint() {
        for st in LoanStatus::ALL {
            assert!(!(st.is_terminal() && st.is_active()), "{st:?}");
        }
    }

    #[test]
    fn validation_result_merge_combines_everything() {
        let mut a = ValidationResult::valid();
        a.add_warning("w1");
        a.add_risk_factor("high_amount", true);

        let mut b = ValidationResult::valid();
        b.add_error("e1");
        b.requires_review = true;

        let merged = a.merge(b);
        assert!(!merged.is_valid);
        assert!(merged.requires_review);
        assert_eq!(merged.errors, vec!["e1"]);
        assert_eq!(merged.warnings, vec!["w1"]);
        assert_eq!(merged.risk_factors["high_amount"], Value::Bool(true));
    }

    #[test]
    fn unavailable_banking_info_records_provider_and_error() {
        let info = BankingInfo::unavailable("MX", "connection refused");
        assert_eq!(info.provider_name, "MX_UNAVAILABLE");
        assert_eq!(info.raw_data["error"], "connection refused");
        assert!(info.credit_score.is_none());
    }

    #[test]
    fn analyst_and_admin_can_approve() {
        assert!(UserRole::Admin.can_approve_loans());
        assert!(UserRole::Analyst.can_approve_loans());
        assert!(!UserRole::Viewer.can_approve_loans());
    }
}
