use platform_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

/// Domain-level failures of the identity flows. Handlers convert these
/// into the HTTP error taxonomy via `From<ServiceError> for AppError`;
/// nothing below this layer knows about status codes.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Login failed. Deliberately does not say whether the email was
    /// unknown, the password wrong, or the account not active.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authorized")]
    PermissionDenied,

    #[error("Email already invited or registered")]
    EmailTaken,

    #[error("Invitation not found")]
    InviteNotFound,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    /// Session token failures collapse into one opaque variant so the
    /// response cannot be used as a token oracle.
    #[error("Invalid session")]
    InvalidSession,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Code expired")]
    CodeExpired,

    #[error("Invalid code")]
    InvalidCode,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => ServiceError::EmailTaken,
            StoreError::Backend(e) => ServiceError::Store(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::Internal(e),
            ServiceError::Internal(e) => AppError::Internal(e),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized("Invalid credentials".to_string())
            }
            ServiceError::PermissionDenied => AppError::Unauthorized("Not authorized".to_string()),
            ServiceError::EmailTaken => {
                AppError::Conflict("Email already invited or registered".to_string())
            }
            ServiceError::InviteNotFound => {
                AppError::NotFound("Invitation not found or already used".to_string())
            }
            ServiceError::TokenExpired => AppError::Expired("Token expired".to_string()),
            ServiceError::InvalidToken => {
                AppError::NotFound("Invalid or unknown token".to_string())
            }
            ServiceError::InvalidSession => {
                AppError::Unauthorized("Invalid or expired session token".to_string())
            }
            ServiceError::AccountNotFound => AppError::NotFound("Account not found".to_string()),
            ServiceError::CodeExpired => AppError::Expired("Code expired".to_string()),
            ServiceError::InvalidCode => AppError::Unauthorized("Invalid code".to_string()),
            ServiceError::UnknownRole(role) => {
                AppError::Validation(format!("Unknown role: {}", role))
            }
            ServiceError::Validation(message) => AppError::Validation(message),
        }
    }
}
