//! Unlink error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::errors::{ErrorCode, ErrorKind};
use crate::identity::{AccountId, Provider};
use crate::security::RateLimitError;
use crate::store::StoreError;

/// Why a provider cannot be unlinked at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    /// Telegram is mandatory on this deployment
    TelegramRequired,
    /// The provider is the account's primary auth method
    CurrentAuthProvider,
}

impl UnsupportedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsupportedReason::TelegramRequired => "telegram_required",
            UnsupportedReason::CurrentAuthProvider => "current_auth_provider",
        }
    }
}

/// Unlink errors
#[derive(Debug, Error)]
pub enum UnlinkError {
    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Provider is not attached to the account
    #[error("{0} is not linked to this account")]
    IdentityNotLinked(Provider),

    /// Provider structurally cannot be unlinked
    #[error("{provider} cannot be unlinked ({})", .reason.as_str())]
    ProviderNotSupported {
        provider: Provider,
        reason: UnsupportedReason,
    },

    /// Sole remaining identity
    #[error("Cannot unlink the last identity of an account")]
    LastIdentity,

    /// Account-level unlink cooldown is running
    #[error("Unlink cooldown active, retry in {retry_after_seconds}s")]
    CooldownActive {
        retry_after_seconds: i64,
        blocked_until: DateTime<Utc>,
    },

    /// A live request exists and its resend timer is running
    #[error("A new code can be requested in {retry_after_seconds}s")]
    ResendCooldown {
        retry_after_seconds: i64,
        resend_available_at: DateTime<Utc>,
    },

    /// Request was stored but the OTP could not be delivered
    #[error("Verification code could not be delivered")]
    DeliveryFailed {
        retry_after_seconds: i64,
        resend_available_at: DateTime<Utc>,
    },

    /// Unknown or expired request token
    #[error("Unlink request is invalid or expired")]
    RequestInvalid,

    /// Token belongs to another account or provider
    #[error("Unlink request does not match this account and provider")]
    RequestMismatch,

    /// Wrong OTP
    #[error("Invalid verification code, {attempts_remaining} attempts remaining")]
    OtpInvalid { attempts_remaining: u32 },

    /// OTP attempt budget spent; the request is gone
    #[error("Too many wrong codes, request a new one")]
    OtpAttemptsExceeded,

    /// Too many confirms across requests
    #[error("Too many confirmation attempts, retry in {retry_after_seconds}s")]
    OtpRateLimited {
        retry_after_seconds: i64,
        locked_until: DateTime<Utc>,
    },

    /// OTP hashing failed
    #[error("OTP hashing failed")]
    HashingFailed,

    /// Rate limiter failure
    #[error("Rate limiter error: {0}")]
    RateLimiter(#[from] RateLimitError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for UnlinkError {
    fn code(&self) -> &'static str {
        match self {
            UnlinkError::AccountNotFound(_) => "account_not_found",
            UnlinkError::IdentityNotLinked(_) => "identity_not_linked",
            UnlinkError::ProviderNotSupported { .. } => "provider_not_supported",
            UnlinkError::LastIdentity => "last_identity",
            UnlinkError::CooldownActive { .. } => "cooldown_active",
            UnlinkError::ResendCooldown { .. } => "unlink_otp_resend_cooldown",
            UnlinkError::DeliveryFailed { .. } => "unlink_otp_delivery_failed",
            UnlinkError::RequestInvalid => "unlink_request_invalid",
            UnlinkError::RequestMismatch => "unlink_request_mismatch",
            UnlinkError::OtpInvalid { .. } => "unlink_otp_invalid",
            UnlinkError::OtpAttemptsExceeded => "unlink_otp_attempts_exceeded",
            UnlinkError::OtpRateLimited { .. } => "unlink_otp_rate_limited",
            UnlinkError::HashingFailed | UnlinkError::RateLimiter(_) | UnlinkError::Store(_) => {
                "internal_error"
            }
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            UnlinkError::AccountNotFound(_) => ErrorKind::NotFound,
            UnlinkError::IdentityNotLinked(_)
            | UnlinkError::ProviderNotSupported { .. }
            | UnlinkError::LastIdentity
            | UnlinkError::CooldownActive { .. } => ErrorKind::PolicyBlock,
            UnlinkError::ResendCooldown { .. }
            | UnlinkError::OtpAttemptsExceeded
            | UnlinkError::OtpRateLimited { .. } => ErrorKind::RateLimit,
            UnlinkError::DeliveryFailed { .. } => ErrorKind::DependencyUnavailable,
            UnlinkError::RequestInvalid => ErrorKind::StateConflict,
            UnlinkError::RequestMismatch | UnlinkError::OtpInvalid { .. } => ErrorKind::Validation,
            UnlinkError::HashingFailed | UnlinkError::RateLimiter(_) | UnlinkError::Store(_) => {
                ErrorKind::Internal
            }
        }
    }

    fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            UnlinkError::CooldownActive {
                retry_after_seconds,
                ..
            }
            | UnlinkError::ResendCooldown {
                retry_after_seconds,
                ..
            }
            | UnlinkError::DeliveryFailed {
                retry_after_seconds,
                ..
            }
            | UnlinkError::OtpRateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            UnlinkError::CooldownActive { blocked_until, .. } => Some(*blocked_until),
            UnlinkError::ResendCooldown {
                resend_available_at,
                ..
            }
            | UnlinkError::DeliveryFailed {
                resend_available_at,
                ..
            } => Some(*resend_available_at),
            UnlinkError::OtpRateLimited { locked_until, .. } => Some(*locked_until),
            _ => None,
        }
    }

    fn reason(&self) -> Option<&'static str> {
        match self {
            UnlinkError::ProviderNotSupported { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }

    fn attempts_remaining(&self) -> Option<u32> {
        match self {
            UnlinkError::OtpInvalid { attempts_remaining } => Some(*attempts_remaining),
            UnlinkError::OtpAttemptsExceeded => Some(0),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            // Sanitize internal errors - don't expose storage details
            UnlinkError::HashingFailed | UnlinkError::RateLimiter(_) | UnlinkError::Store(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for unlink operations
pub type UnlinkResult<T> = Result<T, UnlinkError>;
