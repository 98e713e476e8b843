use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use platform_core::error::AppError;

use crate::models::Account;
use crate::AppState;

/// Requires a valid session token and stashes the resolved account in
/// request extensions for handlers to pick up via `CurrentAccount`.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return Err(AppError::Unauthorized(
            "Missing or invalid Authorization header".to_string(),
        ));
    };

    let (account, _claims) = state.identity.verify_session(token).await?;
    req.extensions_mut().insert(CurrentAccount(account));

    Ok(next.run(req).await)
}

/// The authenticated account resolved by `session_middleware`.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Account);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentAccount>()
            .cloned()
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "CurrentAccount missing; session_middleware not applied to this route"
                ))
            })
    }
}
