//! Account and identity data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Account ID type
pub type AccountId = i64;

/// External identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Telegram,
    Email,
    Google,
    Yandex,
    Vk,
    Discord,
}

impl Provider {
    /// Every supported provider
    pub const ALL: [Provider; 6] = [
        Provider::Telegram,
        Provider::Email,
        Provider::Google,
        Provider::Yandex,
        Provider::Vk,
        Provider::Discord,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Telegram => "telegram",
            Provider::Email => "email",
            Provider::Google => "google",
            Provider::Yandex => "yandex",
            Provider::Vk => "vk",
            Provider::Discord => "discord",
        }
    }

    pub fn is_telegram(&self) -> bool {
        matches!(self, Provider::Telegram)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown provider name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Provider::Telegram),
            "email" => Ok(Provider::Email),
            "google" => Ok(Provider::Google),
            "yandex" => Ok(Provider::Yandex),
            "vk" => Ok(Provider::Vk),
            "discord" => Ok(Provider::Discord),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Monetizable state held by an account (subscription, referrals, balance).
///
/// Written by the billing collaborator; the conflict resolver only asks
/// whether anything is there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAssets {
    pub active_subscription: bool,
    pub referral_count: u32,
    pub balance_minor: i64,
}

impl AccountAssets {
    pub fn has_data(&self) -> bool {
        self.active_subscription || self.referral_count > 0 || self.balance_minor != 0
    }
}

/// Account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub is_active: bool,
    pub primary_auth: Provider,
    pub assets: AccountAssets,
    pub created_at: DateTime<Utc>,
}

/// One external provider binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub account_id: AccountId,
    pub provider: Provider,
    pub provider_user_id: String,
    pub linked_at: DateTime<Utc>,
}

/// Why an identity cannot be unlinked right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    LastIdentity,
    CooldownActive,
    IdentityNotLinked,
    ProviderNotSupported,
    TelegramRequired,
    CurrentAuthProvider,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::LastIdentity => "last_identity",
            BlockedReason::CooldownActive => "cooldown_active",
            BlockedReason::IdentityNotLinked => "identity_not_linked",
            BlockedReason::ProviderNotSupported => "provider_not_supported",
            BlockedReason::TelegramRequired => "telegram_required",
            BlockedReason::CurrentAuthProvider => "current_auth_provider",
        }
    }
}

/// Unlink eligibility of one identity.
///
/// A timed block always carries its end, an untimed one never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    Unblocked,
    Blocked(Block),
}

/// A reason paired with the data it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    /// Structural refusal with no end time
    Permanent(PermanentBlock),
    /// Account-level unlink cooldown
    Cooldown { until: DateTime<Utc> },
}

/// Reasons that never expire on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentBlock {
    LastIdentity,
    IdentityNotLinked,
    TelegramRequired,
    CurrentAuthProvider,
}

impl Block {
    pub fn reason(&self) -> BlockedReason {
        match self {
            Block::Cooldown { .. } => BlockedReason::CooldownActive,
            Block::Permanent(PermanentBlock::LastIdentity) => BlockedReason::LastIdentity,
            Block::Permanent(PermanentBlock::IdentityNotLinked) => BlockedReason::IdentityNotLinked,
            Block::Permanent(PermanentBlock::TelegramRequired) => BlockedReason::TelegramRequired,
            Block::Permanent(PermanentBlock::CurrentAuthProvider) => {
                BlockedReason::CurrentAuthProvider
            }
        }
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            Block::Cooldown { until } => Some(*until),
            Block::Permanent(_) => None,
        }
    }
}

impl IdentityStatus {
    pub fn can_unlink(&self) -> bool {
        matches!(self, IdentityStatus::Unblocked)
    }
}

/// Durable cooldown kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKind {
    /// Any further unlink on the account
    Unlink,
    /// Attaching a new Telegram identity
    TelegramRelink,
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownKind::Unlink => write!(f, "unlink"),
            CooldownKind::TelegramRelink => write!(f, "telegram_relink"),
        }
    }
}

impl FromStr for CooldownKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlink" => Ok(CooldownKind::Unlink),
            "telegram_relink" => Ok(CooldownKind::TelegramRelink),
            other => Err(format!("unknown cooldown kind {other}")),
        }
    }
}

/// Client view of one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityView {
    pub provider: Provider,
    pub provider_user_id_masked: String,
    pub linked_at: DateTime<Utc>,
    pub can_unlink: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

/// Whether a Telegram identity may be attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramRelinkView {
    pub requires_unlink_first: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Response of "list linked identities"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedIdentities {
    pub identities: Vec<IdentityView>,
    pub telegram_relink: TelegramRelinkView,
}

/// Result of signing in with a provider identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResult {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Account,
    /// A new account was registered for the identity
    pub created: bool,
}
