use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use platform_core::error::{AppError, Envelope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::CurrentAccount;
use crate::models::{InviteRequest, RoleName};
use crate::services::{AccountCreated, CodeResent, EmailVerified, SessionIssued};
use crate::AppState;

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    pub invite_id: Uuid,
    pub email: String,
    pub role: RoleName,
    pub invite_token: String,
    pub verification_url: String,
    pub expires_utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetupPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTwoFactorRequest {
    pub account_id: Uuid,
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendTwoFactorRequest {
    pub account_id: Uuid,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /invite - invite a new member (requires users:manage).
pub async fn create_invite(
    State(state): State<AppState>,
    CurrentAccount(inviter): CurrentAccount,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<Envelope<CreateInviteResponse>>), AppError> {
    req.validate()?;

    let created = state.identity.invite(&inviter, &req.email, &req.role).await?;

    let verification_url = format!(
        "{}/verify-email?token={}",
        state.config.public_base_url.trim_end_matches('/'),
        created.invite_token
    );

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(CreateInviteResponse {
            invite_id: created.invite_id,
            email: created.email,
            role: created.role,
            invite_token: created.invite_token,
            verification_url,
            expires_utc: created.expires_utc,
        })),
    ))
}

/// GET /verify-email?token=... - the emailed link lands here.
pub async fn verify_email_link(
    State(state): State<AppState>,
    Query(req): Query<VerifyEmailRequest>,
) -> Result<Json<Envelope<EmailVerified>>, AppError> {
    verify_email_impl(state, req).await
}

/// POST /verify-email - same exchange for API clients.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<Json<Envelope<EmailVerified>>, AppError> {
    verify_email_impl(state, req).await
}

async fn verify_email_impl(
    state: AppState,
    req: VerifyEmailRequest,
) -> Result<Json<Envelope<EmailVerified>>, AppError> {
    req.validate()?;
    let verified = state.identity.verify_email(&req.token).await?;
    Ok(Json(Envelope::ok(verified)))
}

/// POST /setup-password - redeem a setup token, create the account.
pub async fn setup_password(
    State(state): State<AppState>,
    Json(req): Json<SetupPasswordRequest>,
) -> Result<(StatusCode, Json<Envelope<AccountCreated>>), AppError> {
    req.validate()?;
    let created = state
        .identity
        .setup_password(&req.token, &req.password, &req.confirm_password)
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(created))))
}

/// POST /verify-2fa - redeem the one-time code, receive a session.
pub async fn verify_two_factor(
    State(state): State<AppState>,
    Json(req): Json<VerifyTwoFactorRequest>,
) -> Result<Json<Envelope<SessionIssued>>, AppError> {
    req.validate()?;
    let session = state
        .identity
        .verify_two_factor(req.account_id, &req.code)
        .await?;
    Ok(Json(Envelope::ok(session)))
}

/// POST /resend-2fa - replace and redeliver the one-time code.
pub async fn resend_two_factor(
    State(state): State<AppState>,
    Json(req): Json<ResendTwoFactorRequest>,
) -> Result<Json<Envelope<CodeResent>>, AppError> {
    let resent = state.identity.resend_two_factor(req.account_id).await?;
    Ok(Json(Envelope::ok(resent)))
}
