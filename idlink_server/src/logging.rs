//! Structured logging configuration.
//!
//! The library crate emits `log` records; the subscriber installed here
//! picks them up alongside the server's own `tracing` events.

use idlink::AccountId;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, defaulting to `info,sqlx=warn,hyper=warn`.
///
/// # Example
///
/// ```no_run
/// use idlink_server::logging;
///
/// logging::init();
/// tracing::info!("Server starting");
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Arguments
///
/// * `event_type` - Type of security event
/// * `account_id` - Account the event concerns, when known
/// * `request_id` - Correlation id of the HTTP request
/// * `message` - Event message
///
/// # Example
///
/// ```
/// use idlink_server::logging::log_security_event;
///
/// log_security_event(
///     "unlink_otp_invalid",
///     Some(123),
///     Some("5f0c9a1e"),
///     "Wrong OTP submitted",
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    account_id: Option<AccountId>,
    request_id: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        account_id = account_id,
        request_id = request_id,
        "SECURITY: {}",
        message
    );
}

/// Log an audit event for a state change that succeeded
pub fn log_audit_event(event_type: &str, account_id: AccountId, message: &str) {
    tracing::info!(
        event_type = event_type,
        account_id = account_id,
        "AUDIT: {}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_without_subscriber() {
        // Should not panic when no subscriber is installed
        log_security_event("link_code_attempts_exceeded", Some(1), None, "test");
        log_security_event("unlink_otp_rate_limited", None, Some("req-1"), "test");
        log_audit_event("merge_committed", 2, "test");
    }
}
