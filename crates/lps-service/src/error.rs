//! Service-boundary error taxonomy. The HTTP layer maps these to status
//! codes; workers treat everything but `Validation` as retryable.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Document, business-rule, or transition validation failed; also carries
    /// the `duplicate_application` conflict. Never retried, never persisted.
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<String>,
    },

    #[error("Country '{country_code}' is not supported. Supported countries: {supported:?}")]
    CountryNotSupported {
        country_code: String,
        supported: Vec<String>,
    },

    #[error("Loan application {0} not found")]
    LoanNotFound(Uuid),

    /// PII sealing failed; surfaces as an internal error, never exposes key
    /// material.
    #[error("encryption failure")]
    Crypto(#[from] lps_pii::PiiError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    /// True for the duplicate-active-application conflict.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Validation { errors, .. }
            if errors.iter().any(|e| e == "duplicate_application"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_detection_reads_error_codes() {
        let dup = ServiceError::validation(
            "An active application already exists for this document",
            vec!["duplicate_application".to_string()],
        );
        assert!(dup.is_duplicate());

        let other = ServiceError::validation("Document validation failed", vec!["bad".into()]);
        assert!(!other.is_duplicate());
    }
}
