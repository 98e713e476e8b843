use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use chrono::{DateTime, Utc};
use platform_core::error::{AppError, Envelope};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::AccountProfile;
use crate::services::SessionIssued;
use crate::AppState;

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenVerification {
    pub account: AccountProfile,
    pub expires_utc: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /login - email + password for active accounts.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Envelope<SessionIssued>>, AppError> {
    req.validate()?;
    let session = state.identity.login(&req.email, &req.password).await?;
    Ok(Json(Envelope::ok(session)))
}

/// POST /verify-token - is this session token still good? Accepts the
/// token as a bearer header or in the body.
pub async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<VerifyTokenRequest>>,
) -> Result<Json<Envelope<TokenVerification>>, AppError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string());

    let token = bearer
        .or_else(|| body.map(|Json(req)| req.token))
        .ok_or_else(|| AppError::Unauthorized("Missing session token".to_string()))?;

    let (account, claims) = state.identity.verify_session(&token).await?;
    let expires_utc = DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Token expiry out of range")))?;

    Ok(Json(Envelope::ok(TokenVerification {
        account: account.profile(),
        expires_utc,
    })))
}
