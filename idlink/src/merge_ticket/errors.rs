//! Manual merge ticket error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::{ErrorCode, ErrorKind};
use crate::security::RateLimitError;
use crate::store::StoreError;

/// Manual merge errors
#[derive(Debug, Error)]
pub enum MergeTicketError {
    /// Ticketing is turned off
    #[error("Manual merge support is currently unavailable")]
    SupportDisabled,

    /// Unknown or expired link code
    #[error("Link code is invalid or expired")]
    CodeInvalid,

    /// Link code attempt budget spent
    #[error("Link code attempts exceeded")]
    CodeAttemptsExceeded,

    /// Code belongs to the requester
    #[error("Cannot merge an account into itself")]
    SameAccount,

    /// Source account was merged away or disabled
    #[error("Source account is inactive")]
    SourceInactive,

    /// Requester account was merged away or disabled
    #[error("Target account is inactive")]
    TargetInactive,

    /// Accounts merge cleanly; confirm the code instead
    #[error("Accounts can be merged without review")]
    NotRequired,

    /// Comment exceeds the allowed length
    #[error("Comment exceeds {max} characters")]
    CommentTooLong { max: usize },

    /// Requester already waits on a ticket
    #[error("A manual merge request is already pending")]
    AlreadyPending,

    /// Same pair was rejected and resubmission is off
    #[error("Manual merge for these accounts was rejected")]
    Rejected,

    /// Unknown ticket
    #[error("Manual merge ticket not found: {0}")]
    NotFound(Uuid),

    /// Ticket left the pending state already
    #[error("Manual merge ticket was already decided")]
    AlreadyDecided,

    /// A decision must approve or reject
    #[error("Decision must be approve or reject")]
    InvalidDecision,

    /// Requester looked up too many codes
    #[error("Too many link code lookups; retry in {retry_after_seconds} seconds")]
    RateLimited {
        retry_after_seconds: i64,
        locked_until: DateTime<Utc>,
    },

    /// Rate limiter failure
    #[error("Rate limiter error: {0}")]
    RateLimiter(#[from] RateLimitError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for MergeTicketError {
    fn code(&self) -> &'static str {
        match self {
            MergeTicketError::SupportDisabled => "support_disabled",
            MergeTicketError::CodeInvalid => "link_code_invalid",
            MergeTicketError::CodeAttemptsExceeded => "link_code_attempts_exceeded",
            MergeTicketError::SameAccount => "link_code_same_account",
            MergeTicketError::SourceInactive => "link_code_source_inactive",
            MergeTicketError::TargetInactive => "link_code_target_inactive",
            MergeTicketError::NotRequired => "manual_merge_not_required",
            MergeTicketError::CommentTooLong { .. } => "comment_too_long",
            MergeTicketError::AlreadyPending => "manual_merge_already_pending",
            MergeTicketError::Rejected => "manual_merge_rejected",
            MergeTicketError::NotFound(_) => "manual_merge_not_found",
            MergeTicketError::AlreadyDecided => "manual_merge_already_decided",
            MergeTicketError::InvalidDecision => "manual_merge_decision_invalid",
            MergeTicketError::RateLimited { .. } => "link_code_rate_limited",
            MergeTicketError::RateLimiter(_) | MergeTicketError::Store(_) => "internal_error",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            MergeTicketError::SupportDisabled => ErrorKind::DependencyUnavailable,
            MergeTicketError::CodeInvalid | MergeTicketError::AlreadyDecided => {
                ErrorKind::StateConflict
            }
            MergeTicketError::CodeAttemptsExceeded | MergeTicketError::RateLimited { .. } => {
                ErrorKind::RateLimit
            }
            MergeTicketError::SameAccount
            | MergeTicketError::NotRequired
            | MergeTicketError::CommentTooLong { .. }
            | MergeTicketError::InvalidDecision => ErrorKind::Validation,
            MergeTicketError::SourceInactive
            | MergeTicketError::TargetInactive
            | MergeTicketError::AlreadyPending
            | MergeTicketError::Rejected => ErrorKind::PolicyBlock,
            MergeTicketError::NotFound(_) => ErrorKind::NotFound,
            MergeTicketError::RateLimiter(_) | MergeTicketError::Store(_) => ErrorKind::Internal,
        }
    }

    fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            MergeTicketError::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            MergeTicketError::RateLimited { locked_until, .. } => Some(*locked_until),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            MergeTicketError::RateLimiter(_) | MergeTicketError::Store(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for manual merge operations
pub type MergeTicketResult<T> = Result<T, MergeTicketError>;
