//! HTTP API for identity linking and account merge.
//!
//! Wraps the `idlink` managers in an axum router with bearer-token
//! authentication, request correlation and Prometheus metrics.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
