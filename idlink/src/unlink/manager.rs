//! Unlink manager implementation.

use super::{
    errors::{UnlinkError, UnlinkResult, UnsupportedReason},
    models::{
        IssuedUnlinkRequest, UnlinkCommit, UnlinkCommitOutcome, UnlinkConfirmed,
        UnlinkRequestRecord,
    },
    otp::{OtpHasher, generate_otp, generate_request_token, hash_request_token},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{SharedClock, seconds_until};
use crate::config::LinkPolicy;
use crate::identity::{
    AccountId, Block, CooldownKind, IdentityStatus, PermanentBlock, Provider, UnlinkContext,
    unlink_status,
};
use crate::notify::OtpSender;
use crate::security::{RateLimitResult, RateLimiter, UNLINK_CONFIRM};
use crate::store::IdentityStore;

/// Issues unlink OTPs and detaches identities once they are confirmed
pub struct UnlinkManager {
    store: Arc<dyn IdentityStore>,
    otp_sender: Arc<dyn OtpSender>,
    hasher: OtpHasher,
    rate_limiter: Arc<RateLimiter>,
    clock: SharedClock,
    policy: LinkPolicy,
}

impl UnlinkManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        otp_sender: Arc<dyn OtpSender>,
        hasher: OtpHasher,
        rate_limiter: Arc<RateLimiter>,
        clock: SharedClock,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            store,
            otp_sender,
            hasher,
            rate_limiter,
            clock,
            policy,
        }
    }

    /// Start unlinking `provider` from `account_id` and send an OTP through it
    ///
    /// A live request for the same pair is reissued with a fresh token and
    /// OTP once its resend timer has elapsed; attempts and expiry carry over.
    ///
    /// # Errors
    ///
    /// * `UnlinkError::IdentityNotLinked` / `LastIdentity` / `ProviderNotSupported` /
    ///   `CooldownActive` - Provider cannot be unlinked now
    /// * `UnlinkError::ResendCooldown` - A live request exists and its timer runs
    /// * `UnlinkError::DeliveryFailed` - Request stored but the OTP did not go out
    pub async fn request_unlink(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> UnlinkResult<IssuedUnlinkRequest> {
        let now = self.clock.now();
        self.ensure_unlinkable(account_id, provider, now).await?;

        let otp = generate_otp();
        let otp_hash = self.hasher.hash(&otp).ok_or(UnlinkError::HashingFailed)?;
        let token = generate_request_token();
        let token_hash = hash_request_token(&token);
        let resend_available_at = now + self.policy.unlink_otp_resend_cooldown;

        let expires_at = match self.store.find_unlink_request(account_id, provider).await? {
            Some(existing) if !existing.is_expired(now) => {
                if !existing.can_resend(now) {
                    return Err(resend_cooldown(existing.resend_available_at, now));
                }
                let reissued = self
                    .store
                    .reissue_unlink_otp(
                        existing.id,
                        &token_hash,
                        &otp_hash,
                        resend_available_at,
                        now,
                    )
                    .await?;
                if !reissued {
                    return Err(resend_cooldown(resend_available_at, now));
                }
                log::debug!("Unlink OTP reissued for account {account_id} ({provider})");
                existing.expires_at
            }
            _ => {
                let record = UnlinkRequestRecord {
                    id: Uuid::new_v4(),
                    token_hash,
                    account_id,
                    provider,
                    otp_hash,
                    created_at: now,
                    expires_at: now + self.policy.unlink_otp_ttl,
                    attempts_remaining: self.policy.unlink_otp_max_attempts,
                    resend_available_at,
                };
                if !self.store.insert_unlink_request(&record, now).await? {
                    // A concurrent request for the same pair got there first
                    return Err(resend_cooldown(resend_available_at, now));
                }
                log::info!("Unlink requested for account {account_id} ({provider})");
                record.expires_at
            }
        };

        if let Err(e) = self
            .otp_sender
            .send_unlink_otp(account_id, provider, &otp)
            .await
        {
            log::warn!("Unlink OTP delivery to account {account_id} ({provider}) failed: {e}");
            return Err(UnlinkError::DeliveryFailed {
                retry_after_seconds: seconds_until(now, resend_available_at),
                resend_available_at,
            });
        }

        Ok(IssuedUnlinkRequest {
            provider,
            request_token: token,
            expires_at,
            resend_available_at,
        })
    }

    /// Verify the OTP and detach the identity
    ///
    /// # Errors
    ///
    /// * `UnlinkError::RequestInvalid` - Unknown, expired or already used token
    /// * `UnlinkError::RequestMismatch` - Token issued for another account or provider
    /// * `UnlinkError::OtpInvalid` - Wrong OTP, attempts remain
    /// * `UnlinkError::OtpAttemptsExceeded` - Wrong OTP budget spent, request dropped
    /// * `UnlinkError::OtpRateLimited` - Too many confirms across requests
    pub async fn confirm_unlink(
        &self,
        account_id: AccountId,
        provider: Provider,
        request_token: &str,
        otp: &str,
    ) -> UnlinkResult<UnlinkConfirmed> {
        if let RateLimitResult::Locked {
            retry_after,
            locked_until,
        } = self
            .rate_limiter
            .check_and_record(UNLINK_CONFIRM, &account_id.to_string())
            .await?
        {
            return Err(UnlinkError::OtpRateLimited {
                retry_after_seconds: retry_after,
                locked_until,
            });
        }

        let now = self.clock.now();
        let request = self
            .store
            .find_unlink_request_by_token(&hash_request_token(request_token.trim()))
            .await?
            .ok_or(UnlinkError::RequestInvalid)?;

        if request.is_expired(now) {
            self.store.delete_unlink_request(request.id).await?;
            return Err(UnlinkError::RequestInvalid);
        }
        if request.account_id != account_id || request.provider != provider {
            return Err(UnlinkError::RequestMismatch);
        }
        if request.attempts_remaining == 0 {
            self.store.delete_unlink_request(request.id).await?;
            return Err(UnlinkError::OtpAttemptsExceeded);
        }

        if !self.hasher.verify(otp, &request.otp_hash) {
            return match self.store.record_failed_otp(request.id).await? {
                Some(attempts_remaining) if attempts_remaining > 0 => {
                    log::debug!(
                        "Wrong unlink OTP for account {account_id}, {attempts_remaining} left"
                    );
                    Err(UnlinkError::OtpInvalid { attempts_remaining })
                }
                _ => {
                    self.store.delete_unlink_request(request.id).await?;
                    log::warn!("Unlink OTP budget spent for account {account_id} ({provider})");
                    Err(UnlinkError::OtpAttemptsExceeded)
                }
            };
        }

        // Eligibility may have changed since the request was issued
        if let Err(e) = self.ensure_unlinkable(account_id, provider, now).await {
            if matches!(
                e,
                UnlinkError::IdentityNotLinked(_)
                    | UnlinkError::LastIdentity
                    | UnlinkError::ProviderNotSupported { .. }
            ) {
                self.store.delete_unlink_request(request.id).await?;
            }
            return Err(e);
        }

        let commit = UnlinkCommit {
            request_id: request.id,
            account_id,
            provider,
            unlink_cooldown_until: now + self.policy.unlink_cooldown,
            telegram_relink_until: provider
                .is_telegram()
                .then(|| now + self.policy.telegram_relink_cooldown),
        };

        match self.store.complete_unlink(&commit).await? {
            UnlinkCommitOutcome::Completed => {
                log::info!("Identity {provider} unlinked from account {account_id}");
                Ok(UnlinkConfirmed { provider })
            }
            UnlinkCommitOutcome::RequestGone => Err(UnlinkError::RequestInvalid),
            UnlinkCommitOutcome::AttemptsExhausted => {
                log::warn!("Unlink OTP budget spent for account {account_id} ({provider})");
                Err(UnlinkError::OtpAttemptsExceeded)
            }
            UnlinkCommitOutcome::IdentityGone => Err(UnlinkError::IdentityNotLinked(provider)),
            UnlinkCommitOutcome::LastIdentity => Err(UnlinkError::LastIdentity),
        }
    }

    /// Map the identity's unlink status onto an error
    async fn ensure_unlinkable(
        &self,
        account_id: AccountId,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> UnlinkResult<()> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(UnlinkError::AccountNotFound(account_id))?;
        let identities = self.store.list_identities(account_id).await?;
        let unlink_cooldown_until = self
            .store
            .get_cooldown(account_id, CooldownKind::Unlink)
            .await?;

        let ctx = UnlinkContext {
            account: &account,
            identities: &identities,
            unlink_cooldown_until,
            telegram_required: self.policy.telegram_required,
            now,
        };

        match unlink_status(provider, &ctx) {
            IdentityStatus::Unblocked => Ok(()),
            IdentityStatus::Blocked(Block::Cooldown { until }) => {
                Err(UnlinkError::CooldownActive {
                    retry_after_seconds: seconds_until(now, until),
                    blocked_until: until,
                })
            }
            IdentityStatus::Blocked(Block::Permanent(block)) => Err(match block {
                PermanentBlock::IdentityNotLinked => UnlinkError::IdentityNotLinked(provider),
                PermanentBlock::LastIdentity => UnlinkError::LastIdentity,
                PermanentBlock::TelegramRequired => UnlinkError::ProviderNotSupported {
                    provider,
                    reason: UnsupportedReason::TelegramRequired,
                },
                PermanentBlock::CurrentAuthProvider => UnlinkError::ProviderNotSupported {
                    provider,
                    reason: UnsupportedReason::CurrentAuthProvider,
                },
            }),
        }
    }
}

fn resend_cooldown(resend_available_at: DateTime<Utc>, now: DateTime<Utc>) -> UnlinkError {
    UnlinkError::ResendCooldown {
        retry_after_seconds: seconds_until(now, resend_available_at),
        resend_available_at,
    }
}
