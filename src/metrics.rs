// Prometheus metrics for the request throttle
//
// - Admitted requests per role (counter)
// - Denied requests per role and reason (counter)
// - Freezes applied per role (counter)
// - Store failures per operation (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref REQUESTS_ADMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("throttle_requests_admitted_total", "Requests admitted by the throttle"),
        &["role"]
    ).expect("Failed to create admitted requests metric");

    pub static ref REQUESTS_DENIED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("throttle_requests_denied_total", "Requests denied by the throttle"),
        &["role", "reason"]
    ).expect("Failed to create denied requests metric");

    pub static ref FREEZES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("throttle_freezes_total", "Freezes applied after quota exhaustion"),
        &["role"]
    ).expect("Failed to create freezes metric");

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("throttle_store_errors_total", "Store failures handled by failing open"),
        &["op"]
    ).expect("Failed to create store errors metric");
}

/// Register every metric with [`REGISTRY`]; call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REQUESTS_ADMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_DENIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FREEZES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
