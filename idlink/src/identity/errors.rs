//! Identity error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::AuthError;
use crate::errors::{ErrorCode, ErrorKind};
use crate::identity::{AccountId, Provider};
use crate::store::StoreError;

/// Identity errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account was merged away or disabled
    #[error("Account is inactive")]
    AccountInactive,

    /// Empty or oversized external id
    #[error("Invalid provider user id")]
    InvalidProviderUserId,

    /// External id belongs to another account
    #[error("This {0} identity is already linked to another account")]
    IdentityAlreadyLinked(Provider),

    /// Account already holds a different identity of this provider
    #[error("A {0} identity is already linked to this account")]
    ProviderAlreadyLinked(Provider),

    /// A different Telegram identity is attached
    #[error("Unlink the current Telegram identity first")]
    TelegramRequiresUnlinkFirst,

    /// Telegram was unlinked recently
    #[error("Telegram can be linked again in {retry_after_seconds}s")]
    TelegramRelinkCooldown {
        retry_after_seconds: i64,
        blocked_until: DateTime<Utc>,
    },

    /// Session issuance failed
    #[error("Session error: {0}")]
    Session(#[from] AuthError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for IdentityError {
    fn code(&self) -> &'static str {
        match self {
            IdentityError::AccountNotFound(_) => "account_not_found",
            IdentityError::AccountInactive => "account_inactive",
            IdentityError::InvalidProviderUserId => "provider_user_id_invalid",
            IdentityError::IdentityAlreadyLinked(_) => "identity_already_linked",
            IdentityError::ProviderAlreadyLinked(_) => "provider_already_linked",
            IdentityError::TelegramRequiresUnlinkFirst => "telegram_requires_unlink_first",
            IdentityError::TelegramRelinkCooldown { .. } => "telegram_relink_cooldown_active",
            IdentityError::Session(_) | IdentityError::Store(_) => "internal_error",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::AccountNotFound(_) => ErrorKind::NotFound,
            IdentityError::InvalidProviderUserId => ErrorKind::Validation,
            IdentityError::AccountInactive
            | IdentityError::IdentityAlreadyLinked(_)
            | IdentityError::ProviderAlreadyLinked(_)
            | IdentityError::TelegramRequiresUnlinkFirst
            | IdentityError::TelegramRelinkCooldown { .. } => ErrorKind::PolicyBlock,
            IdentityError::Session(_) | IdentityError::Store(_) => ErrorKind::Internal,
        }
    }

    fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            IdentityError::TelegramRelinkCooldown {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            IdentityError::TelegramRelinkCooldown { blocked_until, .. } => Some(*blocked_until),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            // Sanitize internal errors - don't expose storage details
            IdentityError::Session(_) | IdentityError::Store(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
