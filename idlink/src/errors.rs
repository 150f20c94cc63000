//! Error taxonomy shared by every module.
//!
//! Each module keeps its own `thiserror` enum. They all implement
//! [`ErrorCode`], which gives callers a stable machine-readable code, the
//! kind of failure, and timing hints for cooldowns and rate limits.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of failure, independent of the concrete error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input or a request that can never succeed as sent
    Validation,
    /// Code or token already consumed or expired
    StateConflict,
    /// Business rule refusal (cooldown, last identity, unsupported provider)
    PolicyBlock,
    /// Attempt budget or request rate exhausted
    RateLimit,
    /// A collaborator is disabled or failed
    DependencyUnavailable,
    /// Workflow must continue through human review
    ConflictRequiresHuman,
    /// Referenced record does not exist
    NotFound,
    /// Storage or other internal failure
    Internal,
}

/// Stable description of an error for API consumers
pub trait ErrorCode {
    /// Machine-readable code, stable across releases
    fn code(&self) -> &'static str;

    /// Failure kind
    fn kind(&self) -> ErrorKind;

    /// Seconds until the blocked action may be retried
    fn retry_after_seconds(&self) -> Option<i64> {
        None
    }

    /// Absolute end of the blocking cooldown
    fn blocked_until(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Sub-reason for policy blocks that share one code
    fn reason(&self) -> Option<&'static str> {
        None
    }

    /// Attempts left on the code or request after this failure
    fn attempts_remaining(&self) -> Option<u32> {
        None
    }

    /// Message safe to show to clients
    fn client_message(&self) -> String;
}
