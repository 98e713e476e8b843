use crate::services::metrics::get_metrics;

/// GET /metrics - Prometheus exposition format.
pub async fn metrics() -> String {
    get_metrics()
}
