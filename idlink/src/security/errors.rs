//! Error types for security module

use thiserror::Error;

use crate::store::StoreError;

/// Result type for rate limiting operations
pub type RateLimiterResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid endpoint configuration
    #[error("Invalid endpoint configuration: {0}")]
    InvalidEndpoint(String),
}
