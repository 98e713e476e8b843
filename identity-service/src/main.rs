use std::net::SocketAddr;
use std::sync::Arc;

use platform_core::error::AppError;
use platform_core::middleware::rate_limit::create_ip_rate_limiter;
use platform_core::observability::logging::init_tracing;

use identity_service::config::IdentityConfig;
use identity_service::models::RoleRegistry;
use identity_service::services::{
    metrics, CodeGenerator, Evaluator, IdentityService, NotificationDispatcher, SmtpNotifier,
    TokenService,
};
use identity_service::store::{CredentialStore, PgStore};
use identity_service::utils::SecretHasher;
use identity_service::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;

    let store: Arc<dyn CredentialStore> = Arc::new(PgStore::new(pool));
    let tokens = TokenService::new(&config.tokens);
    let hasher = SecretHasher::new(
        config.password.argon2_memory_kib,
        config.password.argon2_iterations,
        config.password.argon2_parallelism,
    )
    .map_err(AppError::Config)?;
    let codes = CodeGenerator::new(config.two_factor.code_length, config.two_factor.ttl_seconds);
    let notifier: Arc<dyn NotificationDispatcher> = Arc::new(
        SmtpNotifier::new(&config.smtp, &config.public_base_url)
            .map_err(|e| AppError::Config(anyhow::Error::new(e)))?,
    );
    let evaluator = Evaluator::new(Arc::new(RoleRegistry::builtin()));
    let identity = IdentityService::new(
        store.clone(),
        tokens.clone(),
        hasher,
        codes,
        notifier.clone(),
        evaluator.clone(),
        config.password.min_length,
    );

    if let (Some(email), Some(password)) = (
        config.bootstrap.admin_email.as_deref(),
        config.bootstrap.admin_password.as_deref(),
    ) {
        match identity.bootstrap_super_admin(email, password).await? {
            Some(account_id) => {
                tracing::info!(account_id = %account_id, "Bootstrap super admin created")
            }
            None => tracing::debug!("Bootstrap super admin already present"),
        }
    }

    let state = AppState {
        login_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        ),
        two_factor_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.two_factor_attempts,
            config.rate_limit.two_factor_window_seconds,
        ),
        invite_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.invite_attempts,
            config.rate_limit.invite_window_seconds,
        ),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
        store,
        tokens,
        identity,
        evaluator,
        notifier,
        config: config.clone(),
    };

    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(addr = %addr, "Identity service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Identity service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
