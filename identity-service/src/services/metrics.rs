use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static INVITES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static LOGINS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static TWO_FACTOR_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn counter(name: &str, help: &str) -> IntCounterVec {
    match IntCounterVec::new(Opts::new(name, help), &["outcome"]) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

pub fn init_metrics() {
    let registry = Registry::new();

    let invites_total = counter("identity_invites_total", "Invites issued, by outcome");
    let logins_total = counter("identity_logins_total", "Login attempts, by outcome");
    let two_factor_total = counter(
        "identity_two_factor_total",
        "Two-factor verification attempts, by outcome",
    );

    for metric in [&invites_total, &logins_total, &two_factor_total] {
        if let Err(e) = registry.register(Box::new(metric.clone())) {
            tracing::error!("Failed to register metrics collector: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = INVITES_TOTAL.set(invites_total);
    let _ = LOGINS_TOTAL.set(logins_total);
    let _ = TWO_FACTOR_TOTAL.set(two_factor_total);
}

/// Increment an outcome-labelled counter. A no-op before init, so unit
/// tests need no metrics setup.
pub fn record(metric: &OnceLock<IntCounterVec>, outcome: &str) {
    if let Some(counter) = metric.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_outcomes_appear_in_export() {
        init_metrics();
        record(&LOGINS_TOTAL, "success");
        record(&LOGINS_TOTAL, "rejected");
        record(&LOGINS_TOTAL, "rejected");

        let exported = get_metrics();
        assert!(exported.contains("identity_logins_total"));
        assert!(exported.contains("outcome=\"rejected\""));
    }
}
