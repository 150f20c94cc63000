//! Unlink request data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{AccountId, Provider};

/// Stored unlink request. Token and OTP are kept only as digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkRequestRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub account_id: AccountId,
    pub provider: Provider,
    pub otp_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: u32,
    pub resend_available_at: DateTime<Utc>,
}

impl UnlinkRequestRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn can_resend(&self, now: DateTime<Utc>) -> bool {
        self.resend_available_at <= now
    }
}

/// Request handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedUnlinkRequest {
    pub provider: Provider,
    pub request_token: String,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

/// Result of a confirmed unlink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkConfirmed {
    pub provider: Provider,
}

/// Everything the store needs to detach an identity
#[derive(Debug, Clone)]
pub struct UnlinkCommit {
    pub request_id: Uuid,
    pub account_id: AccountId,
    pub provider: Provider,
    pub unlink_cooldown_until: DateTime<Utc>,
    /// Set when the detached identity is Telegram
    pub telegram_relink_until: Option<DateTime<Utc>>,
}

/// Store-level result of an unlink commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkCommitOutcome {
    Completed,
    /// Request consumed or deleted concurrently
    RequestGone,
    /// Wrong guesses spent the OTP budget before the commit
    AttemptsExhausted,
    /// Identity was detached by another path
    IdentityGone,
    /// Detaching would leave the account without a way to log in
    LastIdentity,
}
