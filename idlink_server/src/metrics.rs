//! Prometheus metrics for the linking API.
//!
//! Metrics are exposed in Prometheus text format on a dedicated listener.
//! Without an installed exporter every recording call is a no-op.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts, duration, status codes
//! - **Link Metrics**: Codes issued, previews, merges, manual tickets
//! - **Unlink Metrics**: Requests and confirmations
//! - **Error Metrics**: Error responses by machine code

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Link Metrics
// ============================================================================

/// Increment link codes issued counter.
pub fn link_codes_created_total() {
    metrics::counter!("link_codes_created_total").increment(1);
}

/// Increment link code previews counter.
pub fn link_previews_total(manual_merge_required: bool) {
    metrics::counter!("link_previews_total",
        "manual_merge_required" => manual_merge_required.to_string()
    )
    .increment(1);
}

/// Increment committed merges counter.
pub fn merges_total(replaced_telegram: bool) {
    metrics::counter!("merges_total",
        "replaced_telegram" => replaced_telegram.to_string()
    )
    .increment(1);
}

/// Increment manual merge tickets counter.
pub fn manual_merge_tickets_total() {
    metrics::counter!("manual_merge_tickets_total").increment(1);
}

// ============================================================================
// Unlink Metrics
// ============================================================================

/// Increment unlink requests counter.
pub fn unlink_requests_total(provider: &str) {
    metrics::counter!("unlink_requests_total",
        "provider" => provider.to_string()
    )
    .increment(1);
}

/// Increment confirmed unlinks counter.
pub fn unlinks_confirmed_total(provider: &str) {
    metrics::counter!("unlinks_confirmed_total",
        "provider" => provider.to_string()
    )
    .increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Increment error responses counter.
pub fn api_errors_total(code: &str) {
    metrics::counter!("api_errors_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Increment rate limit hits counter.
pub fn rate_limit_hits_total(code: &str) {
    metrics::counter!("rate_limit_hits_total",
        "code" => code.to_string()
    )
    .increment(1);
}
