//! Axum router and all HTTP handlers for lps-api.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers (CORS, tracing) afterwards so tests can compose the
//! bare router.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use lps_db::{EnqueueJob, LoanFilter, NewWebhookEvent};
use lps_schemas::{BankingWebhookPayload, LoanStatus};
use lps_service::{CreateApplication, ServiceError, QUEUE_AUDIT};

use crate::api_types::{
    HealthResponse, LoanCreateRequest, LoanDetailResponse, LoanListQuery, LoanListResponse,
    LoanResponse, LoanStatusUpdateRequest, LoginRequest, ReadinessResponse, RefreshRequest,
    StatisticsQuery, StatusHistoryResponse, TokenResponse, UserResponse, WebhookEventResponse,
    WebhookEventsQuery, WebhookResponse,
};
use crate::auth::{self, AuthUser, REFRESH_TOKEN_TYPE};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/health/ready", get(readiness))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/auth/me", get(me))
        .route("/api/v1/loans", post(create_loan).get(list_loans))
        .route("/api/v1/loans/statistics", get(loan_statistics))
        .route("/api/v1/loans/:id", get(get_loan))
        .route("/api/v1/loans/:id/history", get(loan_history))
        .route("/api/v1/loans/:id/status", patch(update_loan_status))
        .route("/api/v1/webhooks/banking/:country", post(banking_webhook))
        .route("/api/v1/webhooks/events", get(webhook_events))
        .route("/api/v1/ws/loans", get(ws::loans_socket))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: VERSION,
    })
}

pub(crate) async fn readiness(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match lps_db::status(&st.pool).await {
        Ok(status) if status.ok && status.has_schema => "connected",
        Ok(_) => "no schema",
        Err(_) => "unavailable",
    };
    let cache = if st.cache.ping().await {
        "connected"
    } else {
        "unavailable"
    };

    let healthy = database == "connected";
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadinessResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: Utc::now(),
            version: VERSION,
            database: database.to_string(),
            cache: cache.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

pub(crate) async fn login(
    State(st): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = lps_db::find_user_by_email(&st.pool, &req.email)
        .await
        .map_err(ApiError::internal)?;

    let Some(user) = user else {
        warn!(email = %req.email, "login attempt for unknown email");
        return Err(ApiError::unauthorized("Incorrect email or password"));
    };

    if !auth::verify_password(&req.password, &user.hashed_password) {
        warn!(user_id = %user.id, "login attempt with wrong password");
        return Err(ApiError::unauthorized("Incorrect email or password"));
    }

    if !user.is_active {
        warn!(user_id = %user.id, "login attempt for inactive user");
        return Err(ApiError::forbidden("User account is deactivated"));
    }

    lps_db::touch_last_login(&st.pool, user.id)
        .await
        .map_err(ApiError::internal)?;

    info!(user_id = %user.id, "user logged in");
    issue_tokens(&st, user.id, &user.email, user.role)
}

pub(crate) async fn refresh(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = auth::verify_token(
        &st.settings.jwt_secret,
        &req.refresh_token,
        REFRESH_TOKEN_TYPE,
    )
    .ok_or_else(|| ApiError::unauthorized("Invalid or expired refresh token"))?;

    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| ApiError::unauthorized("Invalid token payload"))?;

    let user = lps_db::fetch_user(&st.pool, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

    if !user.is_active {
        return Err(ApiError::forbidden("User account is deactivated"));
    }

    issue_tokens(&st, user.id, &user.email, user.role)
}

fn issue_tokens(
    st: &AppState,
    user_id: Uuid,
    email: &str,
    role: lps_schemas::UserRole,
) -> Result<Json<TokenResponse>, ApiError> {
    let access = auth::create_access_token(
        &st.settings.jwt_secret,
        user_id,
        email,
        role,
        st.settings.jwt_access_ttl_minutes,
    )
    .map_err(ApiError::internal)?;
    let refresh = auth::create_refresh_token(
        &st.settings.jwt_secret,
        user_id,
        st.settings.jwt_refresh_ttl_days,
    )
    .map_err(ApiError::internal)?;

    Ok(Json(TokenResponse {
        access_token: access,
        refresh_token: refresh,
        token_type: "bearer".to_string(),
        expires_in: st.settings.jwt_access_ttl_minutes * 60,
    }))
}

pub(crate) async fn me(user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: user.id,
        email: user.email,
        full_name: user.full_name,
        role: user.role,
        // The extractor rejects inactive users, so an authenticated caller
        // is active by construction.
        is_active: true,
        is_verified: user.is_verified,
    })
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

pub(crate) async fn create_loan(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<LoanCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let loan = st
        .service
        .create_application(CreateApplication {
            country_code: req.country_code,
            document_type: req.document_type,
            document_number: req.document_number,
            full_name: req.full_name,
            amount_requested: req.amount_requested,
            monthly_income: req.monthly_income,
            actor_id: Some(user.id),
        })
        .await?;

    info!(loan_id = %loan.id, user_id = %user.id, "loan created");
    Ok((
        StatusCode::CREATED,
        Json(LoanResponse::from_row(&loan, st.service.codec())),
    ))
}

pub(crate) async fn list_loans(
    State(st): State<Arc<AppState>>,
    _user: AuthUser,
    Query(query): Query<LoanListQuery>,
) -> Result<Json<LoanListResponse>, ApiError> {
    let (page, page_size) = query.clamped();
    let filter = LoanFilter {
        country_code: query.country_code.map(|cc| cc.to_uppercase()),
        status: query.status,
        requires_review: query.requires_review,
        ..Default::default()
    };

    let (loans, total) = st
        .service
        .list_loans(&filter, (page - 1) * page_size, page_size)
        .await?;

    Ok(Json(LoanListResponse::from_results(
        &loans,
        total,
        page,
        page_size,
        st.service.codec(),
    )))
}

pub(crate) async fn loan_statistics(
    State(st): State<Arc<AppState>>,
    _user: AuthUser,
    Query(query): Query<StatisticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let country = query.country_code.map(|cc| cc.to_uppercase());
    let stats = st.service.get_statistics(country.as_deref()).await?;

    // total_count kept alongside total_loans for older dashboard clients.
    Ok(Json(json!({
        "total_count": stats.total_loans,
        "total_loans": stats.total_loans,
        "by_status": stats.by_status,
        "by_country": stats.by_country,
        "total_amount_requested": stats.total_amount_requested,
        "average_amount": stats.average_amount,
        "average_risk_score": stats.average_risk_score,
        "pending_review_count": stats.pending_review_count,
    })))
}

pub(crate) async fn get_loan(
    State(st): State<Arc<AppState>>,
    _user: AuthUser,
    Path(loan_id): Path<Uuid>,
) -> Result<Json<LoanDetailResponse>, ApiError> {
    let loan = st.service.get_loan(loan_id).await?;
    Ok(Json(LoanDetailResponse {
        loan: LoanResponse::from_row(&loan, st.service.codec()),
        banking_info: loan.banking_info.clone(),
        extra_data: loan.extra_data.clone(),
    }))
}

pub(crate) async fn loan_history(
    State(st): State<Arc<AppState>>,
    _user: AuthUser,
    Path(loan_id): Path<Uuid>,
) -> Result<Json<Vec<StatusHistoryResponse>>, ApiError> {
    let history = st.service.get_status_history(loan_id).await?;
    Ok(Json(history.iter().map(StatusHistoryResponse::from).collect()))
}

pub(crate) async fn update_loan_status(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(loan_id): Path<Uuid>,
    Json(req): Json<LoanStatusUpdateRequest>,
) -> Result<Json<LoanResponse>, ApiError> {
    // Approval authority is role-gated.
    if matches!(req.status, LoanStatus::Approved | LoanStatus::Rejected)
        && !user.role.can_approve_loans()
    {
        return Err(ApiError::forbidden(
            "Only analysts can approve or reject loans",
        ));
    }

    let loan = st
        .service
        .transition_status(loan_id, req.status, Some(user.id), req.reason.as_deref())
        .await
        .map_err(|e| match e {
            // Invalid transitions are a 400 on this endpoint.
            ServiceError::Validation { message, errors } => {
                ApiError::bad_request(message).with_errors(errors)
            }
            other => ApiError::from_service(other),
        })?;

    info!(
        loan_id = %loan_id,
        status = req.status.as_str(),
        user_id = %user.id,
        "loan status updated via API"
    );

    Ok(Json(LoanResponse::from_row(&loan, st.service.codec())))
}

// ---------------------------------------------------------------------------
// Inbound banking webhooks
// ---------------------------------------------------------------------------

/// Constant-time HMAC-SHA256 verification of the raw request body.
pub fn verify_webhook_signature(payload: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

pub(crate) async fn banking_webhook(
    State(st): State<Arc<AppState>>,
    Path(country): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let country = country.to_uppercase();

    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!(country = %country, "webhook without signature");
            ApiError::unauthorized("Missing webhook signature")
        })?;

    // Rejected before anything is stored.
    if !verify_webhook_signature(&body, signature, &st.settings.webhook_secret) {
        warn!(country = %country, "webhook with invalid signature");
        return Err(ApiError::unauthorized("Invalid webhook signature"));
    }

    let payload: BankingWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid webhook payload: {e}")))?;

    // Resolve the loan: uuid first, then document hash.
    let loan = match payload.loan_reference.parse::<Uuid>() {
        Ok(loan_id) => lps_db::fetch_loan(&st.pool, loan_id)
            .await
            .map_err(ApiError::internal)?,
        Err(_) => lps_db::find_by_document_hash(&st.pool, &payload.loan_reference, None)
            .await
            .map_err(ApiError::internal)?,
    };

    let mut processed = false;
    let mut processing_error = None;
    let mut message = "Webhook received and queued for processing".to_string();

    if let Some(loan) = &loan {
        match payload.event_type.as_str() {
            "status_update" => {
                if let Some(mapped) = payload
                    .status
                    .as_deref()
                    .and_then(map_provider_status)
                {
                    if loan.status != mapped {
                        // Status changes go through the service so the
                        // lifecycle graph and side effects apply.
                        match st
                            .service
                            .transition_status(loan.id, mapped, None, Some("Banking provider webhook"))
                            .await
                        {
                            Ok(_) => {
                                processed = true;
                                message = format!(
                                    "Loan {} status updated to {}",
                                    loan.id,
                                    mapped.as_str()
                                );
                            }
                            Err(e) => {
                                warn!(loan_id = %loan.id, error = %e, "webhook transition rejected");
                                processing_error = Some(e.to_string());
                                message = format!("Webhook received but processing failed: {e}");
                            }
                        }
                    }
                }
            }
            "risk_assessment" => {
                if let Some(score) = payload.risk_score {
                    lps_db::update_risk_score(&st.pool, loan.id, score)
                        .await
                        .map_err(ApiError::internal)?;
                    processed = true;
                    message = format!("Loan {} risk score updated to {score}", loan.id);
                }
            }
            _ => {}
        }
    }

    let event = lps_db::insert_webhook_event(
        &st.pool,
        &NewWebhookEvent {
            source: format!("banking_provider_{country}"),
            event_type: payload.event_type.clone(),
            payload: serde_json::to_value(&payload).unwrap_or_default(),
            signature: Some(signature.to_string()),
            processed,
            processing_error,
            loan_id: loan.as_ref().map(|l| l.id),
        },
    )
    .await
    .map_err(ApiError::internal)?;

    lps_db::enqueue(
        &st.pool,
        &EnqueueJob::new(
            QUEUE_AUDIT,
            json!({
                "entity_type": "webhook_event",
                "entity_id": event.id.to_string(),
                "action": "WEBHOOK_RECEIVED",
                "changes": {
                    "source": event.source,
                    "event_type": payload.event_type,
                    "loan_id": loan.as_ref().map(|l| l.id.to_string()),
                    "processed": processed,
                },
            }),
        ),
    )
    .await
    .map_err(ApiError::internal)?;

    info!(
        event_id = %event.id,
        country = %country,
        event_type = %payload.event_type,
        processed,
        "webhook received"
    );

    Ok(Json(WebhookResponse {
        event_id: event.id,
        processed,
        message,
    }))
}

/// Provider status vocabulary to lifecycle status.
pub fn map_provider_status(status: &str) -> Option<LoanStatus> {
    match status.to_lowercase().as_str() {
        "approved" => Some(LoanStatus::Approved),
        "rejected" => Some(LoanStatus::Rejected),
        "verified" => Some(LoanStatus::Validating),
        "disbursed" => Some(LoanStatus::Disbursed),
        _ => None,
    }
}

pub(crate) async fn webhook_events(
    State(st): State<Arc<AppState>>,
    Query(query): Query<WebhookEventsQuery>,
) -> Result<Json<Vec<WebhookEventResponse>>, ApiError> {
    let events = lps_db::list_webhook_events(
        &st.pool,
        query.source.as_deref(),
        query.processed,
        query.limit.clamp(1, 200),
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(events.iter().map(WebhookEventResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_matches_hmac() {
        let body = br#"{"event_type":"status_update"}"#;
        let mut mac = HmacSha256::new_from_slice(b"webhook-secret-key").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(body, &signature, "webhook-secret-key"));
    }

    #[test]
    fn flipped_body_or_signature_fails() {
        let body = br#"{"event_type":"status_update"}"#;
        let mut mac = HmacSha256::new_from_slice(b"webhook-secret-key").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut tampered_body = body.to_vec();
        tampered_body[0] ^= 0x01;
        assert!(!verify_webhook_signature(
            &tampered_body,
            &signature,
            "webhook-secret-key"
        ));

        let mut tampered_sig = signature.clone().into_bytes();
        tampered_sig[0] = if tampered_sig[0] == b'a' { b'b' } else { b'a' };
        let tampered_sig = String::from_utf8(tampered_sig).unwrap();
        assert!(!verify_webhook_signature(body, &tampered_sig, "webhook-secret-key"));

        assert!(!verify_webhook_signature(body, "zz-not-hex", "webhook-secret-key"));
    }

    #[test]
    fn provider_status_mapping() {
        assert_eq!(map_provider_status("approved"), Some(LoanStatus::Approved));
        assert_eq!(map_provider_status("REJECTED"), Some(LoanStatus::Rejected));
        assert_eq!(map_provider_status("verified"), Some(LoanStatus::Validating));
        assert_eq!(map_provider_status("disbursed"), Some(LoanStatus::Disbursed));
        assert_eq!(map_provider_status("unknown"), None);
    }
}
