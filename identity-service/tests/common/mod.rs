//! Shared harness for identity-service integration tests.
//!
//! Tests run against the real router with the in-memory store and a
//! recording notifier, so the full onboarding flow can be driven
//! end to end without PostgreSQL or SMTP.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use platform_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use identity_service::{
    build_router,
    config::{
        BootstrapConfig, DatabaseConfig, Environment, IdentityConfig, PasswordConfig,
        RateLimitConfig, SecurityConfig, SmtpConfig, TokenConfig, TwoFactorConfig,
    },
    models::{Account, RoleName, RoleRegistry},
    services::{
        CodeGenerator, Evaluator, IdentityService, NotificationDispatcher, RecordingNotifier,
        TokenService,
    },
    store::{CredentialStore, MemoryStore},
    utils::{Password, SecretHasher},
    AppState,
};

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub identity: IdentityService,
    pub tokens: TokenService,
    pub hasher: SecretHasher,
    pub config: IdentityConfig,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: IdentityConfig) -> Self {
        identity_service::services::metrics::init_metrics();

        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tokens = TokenService::new(&config.tokens);
        let hasher = SecretHasher::new(
            config.password.argon2_memory_kib,
            config.password.argon2_iterations,
            config.password.argon2_parallelism,
        )
        .expect("Failed to create hasher");
        let codes = CodeGenerator::new(config.two_factor.code_length, config.two_factor.ttl_seconds);
        let evaluator = Evaluator::new(Arc::new(RoleRegistry::builtin()));

        let store_dyn: Arc<dyn CredentialStore> = store.clone();
        let notifier_dyn: Arc<dyn NotificationDispatcher> = notifier.clone();
        let identity = IdentityService::new(
            store_dyn.clone(),
            tokens.clone(),
            hasher.clone(),
            codes,
            notifier_dyn.clone(),
            evaluator.clone(),
            config.password.min_length,
        );

        let state = AppState {
            config: config.clone(),
            store: store_dyn,
            tokens: tokens.clone(),
            identity: identity.clone(),
            evaluator,
            notifier: notifier_dyn,
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
        };

        let router = build_router(state).expect("Failed to build router");

        TestApp {
            router,
            store,
            notifier,
            identity,
            tokens,
            hasher,
            config,
        }
    }

    /// Insert an already-active account directly into the store.
    pub async fn seed_active(&self, email: &str, password: &str, role: &str) -> Account {
        let password_hash = self
            .hasher
            .hash(&Password::new(password.to_string()))
            .expect("Failed to hash password");
        let account = Account::bootstrap(
            email.to_string(),
            password_hash.into_string(),
            RoleName::new(role),
        );
        self.store
            .put_account(&account)
            .await
            .expect("Failed to seed account");
        account
    }

    /// Drive invite → verify-email → setup-password through the service
    /// API, leaving the account in `pending_2fa`.
    pub async fn onboard_to_pending(&self, admin: &Account, email: &str, password: &str) -> Uuid {
        self.identity
            .invite(admin, email, "EXECUTIVE")
            .await
            .expect("Failed to invite");
        let token = self
            .notifier
            .last_token_for(email)
            .expect("No verification token recorded");
        let verified = self
            .identity
            .verify_email(&token)
            .await
            .expect("Failed to verify email");
        let created = self
            .identity
            .setup_password(&verified.setup_token, password, password)
            .await
            .expect("Failed to set password");
        created.account_id
    }

    /// Log in over HTTP and return the session token.
    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = post_json(
            &self.router,
            "/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["data"]["session_token"]
            .as_str()
            .expect("No session token in response")
            .to_string()
    }
}

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: platform_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        public_base_url: "http://localhost:8080".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        tokens: TokenConfig {
            signing_secret: "integration-test-signing-secret-0123456789".to_string(),
            invite_ttl_seconds: 86_400,
            setup_ttl_seconds: 3_600,
            session_ttl_seconds: 86_400,
        },
        two_factor: TwoFactorConfig {
            code_length: 6,
            ttl_seconds: 600,
        },
        // Minimal Argon2 cost so the suite stays fast.
        password: PasswordConfig {
            min_length: 8,
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: "test".to_string(),
            password: "test".to_string(),
            from_email: "no-reply@test".to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1_000,
            login_window_seconds: 60,
            two_factor_attempts: 1_000,
            two_factor_window_seconds: 60,
            invite_attempts: 1_000,
            invite_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        bootstrap: BootstrapConfig {
            admin_email: None,
            admin_password: None,
        },
    }
}

fn request(method: &str, path: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .extension(axum::extract::ConnectInfo(std::net::SocketAddr::from((
            [127, 0, 0, 1],
            54_321,
        ))));
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub async fn post_json(
    router: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(router, request("POST", path, None, Some(body))).await
}

pub async fn post_json_auth(
    router: &Router,
    path: &str,
    token: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(router, request("POST", path, Some(token), Some(body))).await
}

pub async fn post_auth(router: &Router, path: &str, token: &str) -> (StatusCode, serde_json::Value) {
    send(router, request("POST", path, Some(token), None)).await
}

pub async fn get_path(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    send(router, request("GET", path, None, None)).await
}

/// Assert the uniform failure envelope and return its error code.
pub fn error_code(body: &serde_json::Value) -> String {
    assert_eq!(body["success"], false, "expected failure envelope: {}", body);
    assert!(body.get("data").is_none(), "failure envelope must not carry data");
    body["error"]["code"]
        .as_str()
        .expect("error envelope missing code")
        .to_string()
}
