//! Linking policy: lifetimes, attempt budgets and cooldowns.

use chrono::Duration;

/// Tunable policy for link codes, unlink requests and manual merges
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    /// Lifetime of a link code
    pub link_code_ttl: Duration,

    /// Preview/confirm calls accepted per link code
    pub link_code_max_attempts: u32,

    /// Number of characters in a generated link code
    pub link_code_length: usize,

    /// Lifetime of an unlink request and its OTP
    pub unlink_otp_ttl: Duration,

    /// Wrong OTP submissions tolerated per unlink request
    pub unlink_otp_max_attempts: u32,

    /// Minimum delay between OTP issues for one unlink request
    pub unlink_otp_resend_cooldown: Duration,

    /// Account-wide pause after a completed unlink
    pub unlink_cooldown: Duration,

    /// Pause before a new Telegram identity may be attached after unlinking one
    pub telegram_relink_cooldown: Duration,

    /// Telegram identities can never be unlinked
    pub telegram_required: bool,

    /// Manual merge tickets are accepted
    pub support_enabled: bool,

    /// A rejected ticket may be followed by a new one for the same pair
    pub allow_resubmit_after_reject: bool,

    /// Maximum length of a manual merge comment
    pub max_comment_chars: usize,
}

impl LinkPolicy {
    /// Load policy from environment variables, falling back to defaults
    ///
    /// Recognised variables:
    /// - `LINK_CODE_TTL_SECS` (600)
    /// - `LINK_CODE_MAX_ATTEMPTS` (5)
    /// - `LINK_CODE_LENGTH` (8)
    /// - `UNLINK_OTP_TTL_SECS` (600)
    /// - `UNLINK_OTP_MAX_ATTEMPTS` (5)
    /// - `UNLINK_OTP_RESEND_COOLDOWN_SECS` (60)
    /// - `UNLINK_COOLDOWN_SECS` (86400)
    /// - `TELEGRAM_RELINK_COOLDOWN_DAYS` (30)
    /// - `TELEGRAM_REQUIRED` (false)
    /// - `SUPPORT_ENABLED` (true)
    /// - `MANUAL_MERGE_ALLOW_RESUBMIT_AFTER_REJECT` (true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            link_code_ttl: Duration::seconds(parse_env_or("LINK_CODE_TTL_SECS", 600)),
            link_code_max_attempts: parse_env_or(
                "LINK_CODE_MAX_ATTEMPTS",
                defaults.link_code_max_attempts,
            ),
            link_code_length: parse_env_or("LINK_CODE_LENGTH", defaults.link_code_length)
                .clamp(6, 16),
            unlink_otp_ttl: Duration::seconds(parse_env_or("UNLINK_OTP_TTL_SECS", 600)),
            unlink_otp_max_attempts: parse_env_or(
                "UNLINK_OTP_MAX_ATTEMPTS",
                defaults.unlink_otp_max_attempts,
            ),
            unlink_otp_resend_cooldown: Duration::seconds(parse_env_or(
                "UNLINK_OTP_RESEND_COOLDOWN_SECS",
                60,
            )),
            unlink_cooldown: Duration::seconds(parse_env_or("UNLINK_COOLDOWN_SECS", 86_400)),
            telegram_relink_cooldown: Duration::days(parse_env_or(
                "TELEGRAM_RELINK_COOLDOWN_DAYS",
                30,
            )),
            telegram_required: parse_env_or("TELEGRAM_REQUIRED", defaults.telegram_required),
            support_enabled: parse_env_or("SUPPORT_ENABLED", defaults.support_enabled),
            allow_resubmit_after_reject: parse_env_or(
                "MANUAL_MERGE_ALLOW_RESUBMIT_AFTER_REJECT",
                defaults.allow_resubmit_after_reject,
            ),
            max_comment_chars: defaults.max_comment_chars,
        }
    }
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            link_code_ttl: Duration::minutes(10),
            link_code_max_attempts: 5,
            link_code_length: 8,
            unlink_otp_ttl: Duration::minutes(10),
            unlink_otp_max_attempts: 5,
            unlink_otp_resend_cooldown: Duration::seconds(60),
            unlink_cooldown: Duration::hours(24),
            telegram_relink_cooldown: Duration::days(30),
            telegram_required: false,
            support_enabled: true,
            allow_resubmit_after_reject: true,
            max_comment_chars: 2000,
        }
    }
}

/// Parse an environment variable, using `default` when unset or invalid
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
