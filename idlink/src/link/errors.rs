//! Link code error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::AuthError;
use crate::conflict::ConflictReason;
use crate::errors::{ErrorCode, ErrorKind};
use crate::identity::AccountId;
use crate::security::RateLimitError;
use crate::store::StoreError;

/// Link code errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Unknown, expired, malformed or already consumed code
    #[error("Link code is invalid or expired")]
    Invalid,

    /// Attempt budget of the code is spent
    #[error("Too many attempts for this link code")]
    AttemptsExceeded,

    /// Requester owns the code
    #[error("Link code belongs to this account")]
    SameAccount,

    /// Source account is disabled
    #[error("Source account is inactive")]
    SourceInactive,

    /// Requester account is disabled
    #[error("Target account is inactive")]
    TargetInactive,

    /// Automatic merge is unsafe
    #[error("Accounts conflict ({}); manual merge required", .reason.as_str())]
    ManualMergeRequired { reason: ConflictReason },

    /// Requester looked up too many codes
    #[error("Too many link code lookups, retry in {retry_after_seconds}s")]
    RateLimited {
        retry_after_seconds: i64,
        locked_until: DateTime<Utc>,
    },

    /// Session issuance failed
    #[error("Session error: {0}")]
    Session(#[from] AuthError),

    /// Rate limiter failure
    #[error("Rate limiter error: {0}")]
    RateLimiter(#[from] RateLimitError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for LinkError {
    fn code(&self) -> &'static str {
        match self {
            LinkError::AccountNotFound(_) => "account_not_found",
            LinkError::Invalid => "link_code_invalid",
            LinkError::AttemptsExceeded => "link_code_attempts_exceeded",
            LinkError::SameAccount => "link_code_same_account",
            LinkError::SourceInactive => "link_code_source_inactive",
            LinkError::TargetInactive => "link_code_target_inactive",
            LinkError::ManualMergeRequired { .. } => "manual_merge_required",
            LinkError::RateLimited { .. } => "link_code_rate_limited",
            LinkError::Session(_) | LinkError::RateLimiter(_) | LinkError::Store(_) => {
                "internal_error"
            }
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            LinkError::AccountNotFound(_) => ErrorKind::NotFound,
            LinkError::Invalid => ErrorKind::StateConflict,
            LinkError::AttemptsExceeded | LinkError::RateLimited { .. } => ErrorKind::RateLimit,
            LinkError::SameAccount => ErrorKind::Validation,
            LinkError::SourceInactive | LinkError::TargetInactive => ErrorKind::PolicyBlock,
            LinkError::ManualMergeRequired { .. } => ErrorKind::ConflictRequiresHuman,
            LinkError::Session(_) | LinkError::RateLimiter(_) | LinkError::Store(_) => {
                ErrorKind::Internal
            }
        }
    }

    fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            LinkError::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            LinkError::RateLimited { locked_until, .. } => Some(*locked_until),
            _ => None,
        }
    }

    fn reason(&self) -> Option<&'static str> {
        match self {
            LinkError::ManualMergeRequired { reason } => Some(reason.as_str()),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            // Sanitize internal errors - don't expose storage details
            LinkError::Session(_) | LinkError::RateLimiter(_) | LinkError::Store(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for link code operations
pub type LinkResult<T> = Result<T, LinkError>;
