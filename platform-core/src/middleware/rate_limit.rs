use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter keyed by client IP address.
pub type IpRateLimiter = Arc<RateLimiter<SocketAddr, DashMapStateStore<SocketAddr>, DefaultClock>>;

/// Build a keyed limiter that admits `attempts` requests per `window_seconds`,
/// with the full burst available up front.
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let burst = NonZeroU32::new(attempts.max(1)).expect("burst is at least one");
    let replenish = Duration::from_secs(window_seconds.max(1)) / burst.get();
    let quota = Quota::with_period(replenish)
        .expect("replenish period is non-zero")
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Resolve the client address: first x-forwarded-for entry when present,
/// otherwise the socket peer address.
fn client_addr(request: &Request) -> Option<SocketAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|entry| entry.trim().parse::<IpAddr>().ok());

    if let Some(ip) = forwarded {
        // Ports behind a proxy are meaningless; normalize so one client
        // maps to one key.
        return Some(SocketAddr::new(ip, 0));
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// IP-keyed rate limiting middleware. Requests whose client IP cannot be
/// determined pass through unchecked.
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(addr) = client_addr(&request) else {
        tracing::warn!("Could not determine client IP; skipping rate limit");
        return Ok(next.run(request).await);
    };

    if let Err(denied) = limiter.check_key(&addr) {
        let retry_after = denied.wait_time_from(DefaultClock::default().now());
        return Err(AppError::TooManyRequests(
            "Rate limit exceeded. Please retry later.".to_string(),
            Some(retry_after.as_secs()),
        ));
    }

    Ok(next.run(request).await)
}
