//! JWT issuance/verification, password hashing, and the authenticated-user
//! extractor.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lps_schemas::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

pub const ACCESS_TOKEN_TYPE: &str = "access";
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("password hashing failed: {e}"))
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// JWT claims; `token_type` keeps access and refresh tokens from standing in
/// for each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

pub fn create_access_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    role: UserRole,
    ttl_minutes: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
        iat: now.timestamp(),
        token_type: ACCESS_TOKEN_TYPE.to_string(),
        email: Some(email.to_string()),
        role: Some(role.as_str().to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow!("token encoding failed: {e}"))
}

pub fn create_refresh_token(secret: &str, user_id: Uuid, ttl_days: i64) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::days(ttl_days)).timestamp(),
        iat: now.timestamp(),
        token_type: REFRESH_TOKEN_TYPE.to_string(),
        email: None,
        role: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow!("token encoding failed: {e}"))
}

/// Decode and validate a token; `None` on any failure (bad signature,
/// expired, wrong type).
pub fn verify_token(secret: &str, token: &str, expected_type: &str) -> Option<Claims> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    (decoded.claims.token_type == expected_type).then_some(decoded.claims)
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The authenticated caller: token verified and user loaded fresh from the
/// database (so deactivation takes effect immediately).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub is_verified: bool,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized = || ApiError::unauthorized("Could not validate credentials");

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;

        let claims = verify_token(&state.settings.jwt_secret, token, ACCESS_TOKEN_TYPE)
            .ok_or_else(unauthorized)?;
        let user_id: Uuid = claims.sub.parse().map_err(|_| unauthorized())?;

        let user = lps_db::fetch_user(&state.pool, user_id)
            .await
            .map_err(|_| unauthorized())?
            .ok_or_else(unauthorized)?;

        if !user.is_active {
            return Err(ApiError::forbidden("User account is deactivated"));
        }

        Ok(AuthUser {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_verified: user.is_verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert_ne!(hash, "hunter2hunter2");
        assert!(verify_password("hunter2hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("hunter2hunter2", "not-a-hash"));
    }

    #[test]
    fn access_token_round_trip_carries_identity() {
        let user_id = Uuid::new_v4();
        let token =
            create_access_token("secret", user_id, "a@b.es", UserRole::Analyst, 60).unwrap();

        let claims = verify_token("secret", &token, ACCESS_TOKEN_TYPE).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("a@b.es"));
        assert_eq!(claims.role.as_deref(), Some("ANALYST"));
    }

    #[test]
    fn refresh_token_cannot_be_used_as_access() {
        let token = create_refresh_token("secret", Uuid::new_v4(), 7).unwrap();
        assert!(verify_token("secret", &token, ACCESS_TOKEN_TYPE).is_none());
        assert!(verify_token("secret", &token, REFRESH_TOKEN_TYPE).is_some());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token =
            create_access_token("secret", Uuid::new_v4(), "a@b.es", UserRole::Viewer, 60).unwrap();
        assert!(verify_token("other-secret", &token, ACCESS_TOKEN_TYPE).is_none());
    }
}
