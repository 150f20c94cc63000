//! Rate limiting with exponential backoff for brute-force sensitive endpoints.
//!
//! Windows and lockouts are persisted through [`RateLimitRepository`] and
//! read back on every check, so limits survive restarts and are evaluated
//! against the server clock only.

use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};

use super::errors::{RateLimitError, RateLimiterResult};
use crate::clock::{SharedClock, seconds_until};
use crate::config::parse_env_or;
use crate::store::IdentityStore;

/// Endpoint name for OTP confirmations (keyed by account)
pub const UNLINK_CONFIRM: &str = "unlink_confirm";

/// Endpoint name for link code lookups (keyed by requester account)
pub const LINK_CODE_LOOKUP: &str = "link_code_lookup";

/// Rate limit configuration for an endpoint
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum attempts allowed in window
    pub max_attempts: u32,

    /// Time window in seconds
    pub window_secs: u64,

    /// Lockout duration in seconds after exceeding limit
    pub lockout_secs: u64,

    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl RateLimitConfig {
    /// OTP confirmations across all unlink requests of one account
    pub fn unlink_confirm() -> Self {
        Self {
            max_attempts: parse_env_or("RATE_LIMIT_UNLINK_CONFIRM_ATTEMPTS", 10),
            window_secs: parse_env_or("RATE_LIMIT_UNLINK_CONFIRM_WINDOW_SECS", 600),
            lockout_secs: parse_env_or("RATE_LIMIT_UNLINK_CONFIRM_LOCKOUT_SECS", 900),
            exponential_backoff: true,
        }
    }

    /// Link code previews, confirmations and submissions by one requester
    pub fn link_code_lookup() -> Self {
        Self {
            max_attempts: parse_env_or("RATE_LIMIT_LINK_LOOKUP_ATTEMPTS", 20),
            window_secs: parse_env_or("RATE_LIMIT_LINK_LOOKUP_WINDOW_SECS", 600),
            lockout_secs: parse_env_or("RATE_LIMIT_LINK_LOOKUP_LOCKOUT_SECS", 1800),
            exponential_backoff: false,
        }
    }
}

/// Rate limit attempt record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitAttempt {
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub consecutive_violations: u32,
}

impl RateLimitAttempt {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            window_start: now,
            locked_until: None,
            consecutive_violations: 0,
        }
    }

    /// Count one attempt against `config`
    ///
    /// Returns the state to persist (`None` while a lockout is running and
    /// nothing changes) and the verdict. Stores call this while holding the
    /// row, so check and increment happen as one step.
    pub fn advance(
        &self,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> (Option<RateLimitAttempt>, RateLimitResult) {
        if let Some(locked_until) = self.locked_until
            && now < locked_until
        {
            let result = RateLimitResult::Locked {
                retry_after: seconds_until(now, locked_until),
                locked_until,
            };
            return (None, result);
        }

        // Window expired: start a new one with this attempt
        let window_duration = Duration::seconds(config.window_secs as i64);
        if now - self.window_start > window_duration {
            let next = RateLimitAttempt {
                attempts: 1,
                window_start: now,
                locked_until: None,
                consecutive_violations: 0,
            };
            let result = RateLimitResult::Allowed {
                remaining: config.max_attempts.saturating_sub(1),
            };
            return (Some(next), result);
        }

        // Limit already reached in this window
        if self.attempts >= config.max_attempts {
            let lockout_secs = if config.exponential_backoff {
                // 2^violations * base lockout
                let multiplier = 2u64.pow(self.consecutive_violations.min(5));
                config.lockout_secs * multiplier
            } else {
                config.lockout_secs
            };

            let locked_until = now + Duration::seconds(lockout_secs as i64);
            let next = RateLimitAttempt {
                attempts: 0,
                window_start: locked_until,
                locked_until: Some(locked_until),
                consecutive_violations: self.consecutive_violations + 1,
            };
            let result = RateLimitResult::Locked {
                retry_after: lockout_secs as i64,
                locked_until,
            };
            return (Some(next), result);
        }

        let next = RateLimitAttempt {
            attempts: self.attempts + 1,
            locked_until: None,
            ..self.clone()
        };
        let remaining = config.max_attempts - next.attempts;
        (Some(next), RateLimitResult::Allowed { remaining })
    }
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed
    Allowed { remaining: u32 },

    /// Action is blocked due to rate limit
    Locked {
        retry_after: i64,
        locked_until: DateTime<Utc>,
    },
}

impl RateLimitResult {
    /// Check if action is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Get retry after seconds (if locked)
    pub fn retry_after(&self) -> Option<i64> {
        match self {
            RateLimitResult::Locked { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Rate limiter with store-backed persistence
pub struct RateLimiter {
    store: Arc<dyn IdentityStore>,
    clock: SharedClock,
    configs: HashMap<String, RateLimitConfig>,
}

impl RateLimiter {
    /// Create a rate limiter with the built-in endpoint configurations
    pub fn new(store: Arc<dyn IdentityStore>, clock: SharedClock) -> Self {
        let mut configs = HashMap::new();
        configs.insert(UNLINK_CONFIRM.to_string(), RateLimitConfig::unlink_confirm());
        configs.insert(
            LINK_CODE_LOOKUP.to_string(),
            RateLimitConfig::link_code_lookup(),
        );
        Self::with_configs(store, clock, configs)
    }

    /// Create a rate limiter with explicit configurations
    pub fn with_configs(
        store: Arc<dyn IdentityStore>,
        clock: SharedClock,
        configs: HashMap<String, RateLimitConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            configs,
        }
    }

    /// Atomically check rate limit and record attempt
    ///
    /// The store applies [`RateLimitAttempt::advance`] under its own row
    /// lock, so concurrent callers (in this process or another) never read
    /// the same count.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Endpoint name (e.g., [`UNLINK_CONFIRM`])
    /// * `identifier` - Unique identifier (account id)
    ///
    /// # Returns
    ///
    /// * `RateLimiterResult<RateLimitResult>` - Whether action is allowed or locked
    pub async fn check_and_record(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> RateLimiterResult<RateLimitResult> {
        let config = self
            .configs
            .get(endpoint)
            .ok_or_else(|| RateLimitError::InvalidEndpoint(endpoint.to_string()))?;

        let result = self
            .store
            .record_attempt(endpoint, identifier, config, self.clock.now())
            .await?;

        if let RateLimitResult::Locked { locked_until, .. } = &result {
            log::warn!(
                "Rate limit lockout on {} for {} until {}",
                endpoint,
                identifier,
                locked_until
            );
        }

        Ok(result)
    }

    /// Reset rate limit for an identifier
    pub async fn reset(&self, endpoint: &str, identifier: &str) -> RateLimiterResult<()> {
        self.store.delete_attempt(endpoint, identifier).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{InMemoryStore, MaintenanceRepository};
    use tokio::task::JoinSet;

    fn create_test_limiter(
        max_attempts: u32,
        exponential_backoff: bool,
    ) -> (Arc<RateLimiter>, ManualClock) {
        let clock = ManualClock::default();
        let mut configs = HashMap::new();
        configs.insert(
            "test_endpoint".to_string(),
            RateLimitConfig {
                max_attempts,
                window_secs: 60,
                lockout_secs: 300,
                exponential_backoff,
            },
        );
        let limiter = RateLimiter::with_configs(
            Arc::new(InMemoryStore::new()),
            Arc::new(clock.clone()),
            configs,
        );
        (Arc::new(limiter), clock)
    }

    #[tokio::test]
    async fn test_check_and_record_allows_within_limit() {
        let (limiter, _) = create_test_limiter(5, false);

        for i in 1..=5 {
            let result = limiter
                .check_and_record("test_endpoint", "test_user")
                .await
                .unwrap();
            assert_eq!(
                result,
                RateLimitResult::Allowed { remaining: 5 - i },
                "Attempt {}: wrong remaining count",
                i
            );
        }

        let result = limiter
            .check_and_record("test_endpoint", "test_user")
            .await
            .unwrap();
        assert_eq!(result.retry_after(), Some(300), "6th attempt should be locked");
    }

    #[tokio::test]
    async fn test_concurrent_requests_no_race_condition() {
        let (limiter, _) = create_test_limiter(5, false);

        let mut join_set = JoinSet::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            join_set.spawn(async move {
                limiter
                    .check_and_record("test_endpoint", "concurrent_user")
                    .await
            });
        }

        let mut allowed_count = 0;
        while let Some(result) = join_set.join_next().await {
            if result.unwrap().unwrap().is_allowed() {
                allowed_count += 1;
            }
        }

        assert_eq!(allowed_count, 5, "Exactly max_attempts requests pass");
    }

    #[tokio::test]
    async fn test_lockout_expires_and_countdown_decreases() {
        let (limiter, clock) = create_test_limiter(1, false);

        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        limiter.check_and_record("test_endpoint", "u").await.unwrap();

        clock.advance(Duration::seconds(100));
        let result = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert_eq!(result.retry_after(), Some(200));

        clock.advance(Duration::seconds(201));
        let result = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert!(result.is_allowed(), "Lockout should have expired");
    }

    #[tokio::test]
    async fn test_exponential_backoff_doubles_lockout() {
        let (limiter, clock) = create_test_limiter(1, true);

        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        let first = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert_eq!(first.retry_after(), Some(300));

        clock.advance(Duration::seconds(301));
        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        let second = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert_eq!(second.retry_after(), Some(600));
    }

    #[tokio::test]
    async fn test_purge_keeps_backoff_history() {
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryStore::new());
        let mut configs = HashMap::new();
        configs.insert(
            "test_endpoint".to_string(),
            RateLimitConfig {
                max_attempts: 1,
                window_secs: 60,
                lockout_secs: 300,
                exponential_backoff: true,
            },
        );
        let limiter = RateLimiter::with_configs(store.clone(), Arc::new(clock.clone()), configs);

        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        limiter.check_and_record("test_endpoint", "u").await.unwrap();

        // Sweep runs after the lockout ended but before the next violation
        clock.advance(Duration::seconds(301));
        store.purge_expired(clock.now()).await.unwrap();

        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        let second = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert_eq!(second.retry_after(), Some(600));
    }

    #[test]
    fn test_advance_leaves_running_lockout_untouched() {
        let now = Utc::now();
        let config = RateLimitConfig {
            max_attempts: 3,
            window_secs: 60,
            lockout_secs: 300,
            exponential_backoff: false,
        };
        let locked = RateLimitAttempt {
            attempts: 0,
            window_start: now + Duration::seconds(120),
            locked_until: Some(now + Duration::seconds(120)),
            consecutive_violations: 1,
        };

        let (next, result) = locked.advance(&config, now);
        assert!(next.is_none());
        assert_eq!(result.retry_after(), Some(120));
    }

    #[tokio::test]
    async fn test_different_identifiers_independent() {
        let (limiter, _) = create_test_limiter(2, false);

        for _ in 0..3 {
            limiter.check_and_record("test_endpoint", "user1").await.unwrap();
        }

        let result = limiter
            .check_and_record("test_endpoint", "user2")
            .await
            .unwrap();
        assert_eq!(result, RateLimitResult::Allowed { remaining: 1 });
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_rejected() {
        let (limiter, _) = create_test_limiter(2, false);
        let err = limiter.check_and_record("nope", "u").await.unwrap_err();
        assert!(matches!(err, RateLimitError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn test_reset_clears_lockout() {
        let (limiter, _) = create_test_limiter(1, false);
        limiter.check_and_record("test_endpoint", "u").await.unwrap();
        limiter.check_and_record("test_endpoint", "u").await.unwrap();

        limiter.reset("test_endpoint", "u").await.unwrap();
        let result = limiter.check_and_record("test_endpoint", "u").await.unwrap();
        assert!(result.is_allowed());
    }
}
