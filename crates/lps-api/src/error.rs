//! API error envelope.
//!
//! 4xx responses carry `{message, errors, details}`; 5xx responses are the
//! generic `Internal server error`, with the underlying error string only in
//! debug mode.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::error;

use lps_service::ServiceError;

static DEBUG_MODE: OnceLock<bool> = OnceLock::new();

/// Record the debug flag once at startup; error bodies consult it.
pub fn set_debug_mode(debug: bool) {
    let _ = DEBUG_MODE.set(debug);
}

fn debug_mode() -> bool {
    *DEBUG_MODE.get().unwrap_or(&false)
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub errors: Vec<String>,
    pub details: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: Vec::new(),
            details: json!({}),
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = ?err, "internal server error");
        let mut api = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        if debug_mode() {
            api.details = json!({"error": err.to_string()});
        }
        api
    }

    /// Service-error mapping for endpoints where validation means 422
    /// (application creation). Transition endpoints map `Validation` to 400
    /// explicitly before calling this.
    pub fn from_service(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation { message, errors } => {
                Self::unprocessable(message).with_errors(errors)
            }
            ServiceError::CountryNotSupported { .. } => Self::bad_request(err.to_string()),
            ServiceError::LoanNotFound(id) => {
                Self::not_found(format!("Loan application {id} not found"))
            }
            ServiceError::Crypto(e) => Self::internal(e.into()),
            ServiceError::Internal(e) => Self::internal(e),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::from_service(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(json!({
                "message": self.message,
                "errors": self.errors,
                "details": self.details,
            })),
        )
            .into_response();

        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422_with_error_list() {
        let api = ApiError::from_service(ServiceError::validation(
            "Document validation failed",
            vec!["Invalid DNI checksum. Expected letter 'Z'.".to_string()],
        ));
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api.errors.len(), 1);
    }

    #[test]
    fn not_found_maps_to_404() {
        let id = uuid::Uuid::new_v4();
        let api = ApiError::from_service(ServiceError::LoanNotFound(id));
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert!(api.message.contains(&id.to_string()));
    }

    #[test]
    fn country_not_supported_maps_to_400() {
        let api = ApiError::from_service(ServiceError::CountryNotSupported {
            country_code: "US".into(),
            supported: vec!["ES".into()],
        });
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
    }
}
