//! Security module providing durable rate limiting.
//!
//! Per-code and per-request attempt budgets live with the codes and
//! requests themselves. This limiter adds budgets that span many codes or
//! requests of one account:
//! - **Unlink confirm**: 10 OTP submissions per 10 minutes, 15-minute lockout with exponential backoff
//! - **Link code lookup**: 20 lookups per 10 minutes, 30-minute lockout

pub mod errors;
pub mod rate_limiter;

pub use errors::{RateLimitError, RateLimiterResult};
pub use rate_limiter::{
    LINK_CODE_LOOKUP, RateLimitAttempt, RateLimitConfig, RateLimitResult, RateLimiter,
    UNLINK_CONFIRM,
};
