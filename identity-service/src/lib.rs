pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use platform_core::error::AppError;
use platform_core::middleware::rate_limit::{ip_rate_limit_middleware, IpRateLimiter};
use platform_core::middleware::security_headers::security_headers_middleware;
use platform_core::middleware::tracing::{request_id, request_id_middleware};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::services::{Evaluator, IdentityService, NotificationDispatcher, TokenService};
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn CredentialStore>,
    pub tokens: TokenService,
    pub identity: IdentityService,
    pub evaluator: Evaluator,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub login_rate_limiter: IpRateLimiter,
    pub two_factor_rate_limiter: IpRateLimiter,
    pub invite_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

/// Assemble the service router: public onboarding and session routes,
/// per-route rate limits on the credential-guessing surfaces, and the
/// shared middleware stack around everything.
pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let login_route = Router::new()
        .route("/login", post(handlers::session::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let two_factor_routes = Router::new()
        .route("/verify-2fa", post(handlers::onboarding::verify_two_factor))
        .route("/resend-2fa", post(handlers::onboarding::resend_two_factor))
        .layer(from_fn_with_state(
            state.two_factor_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let invite_route = Router::new()
        .route("/invite", post(handlers::onboarding::create_invite))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::session_middleware,
        ))
        .layer(from_fn_with_state(
            state.invite_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let cors = cors_layer(&state.config)?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/verify-email",
            get(handlers::onboarding::verify_email_link).post(handlers::onboarding::verify_email),
        )
        .route("/setup-password", post(handlers::onboarding::setup_password))
        .route("/verify-token", post(handlers::session::verify_token))
        .merge(login_route)
        .merge(two_factor_routes)
        .merge(invite_route)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request_id(request.headers()).unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}

fn cors_layer(config: &IdentityConfig) -> Result<CorsLayer, AppError> {
    let mut origins = Vec::with_capacity(config.security.allowed_origins.len());
    for origin in &config.security.allowed_origins {
        origins.push(origin.parse::<HeaderValue>().map_err(|e| {
            AppError::Config(anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
        })?);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

/// GET /health - liveness plus a store connectivity probe.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::Internal(anyhow::Error::new(e))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
