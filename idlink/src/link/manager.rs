//! Link code manager implementation.

use super::{
    code::{CodeSource, RandomCodes, hash_code, normalize_code},
    errors::{LinkError, LinkResult},
    models::{
        AttemptOutcome, IdentityHints, IssuedLinkCode, LinkCodeRecord, LinkPreview, MergeCommit,
        MergePlan, MergeResult,
    },
};
use std::sync::Arc;

use crate::auth::SessionIssuer;
use crate::clock::SharedClock;
use crate::config::LinkPolicy;
use crate::conflict::{ConflictReason, ConflictResolver, Evaluation, MergeSide};
use crate::identity::{Account, AccountId, LinkedIdentity, mask_provider_user_id};
use crate::security::{LINK_CODE_LOOKUP, RateLimitResult, RateLimiter};
use crate::store::{IdentityStore, StoreError};

/// Regenerations tolerated when a fresh code collides with a live one
const MAX_CODE_COLLISIONS: usize = 5;

/// A code that passed validation, with both accounts loaded
struct ResolvedCode {
    record: LinkCodeRecord,
    source: Account,
    evaluation: Evaluation,
}

/// Masked hints for every identity of an account
pub(crate) fn identity_hints(identities: &[LinkedIdentity]) -> IdentityHints {
    identities
        .iter()
        .map(|i| {
            (
                i.provider.as_str().to_string(),
                mask_provider_user_id(i.provider, &i.provider_user_id),
            )
        })
        .collect()
}

/// Creates, previews and confirms link codes
pub struct LinkCodeManager {
    store: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionIssuer>,
    rate_limiter: Arc<RateLimiter>,
    clock: SharedClock,
    policy: LinkPolicy,
    codes: Arc<dyn CodeSource>,
}

impl LinkCodeManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionIssuer>,
        rate_limiter: Arc<RateLimiter>,
        clock: SharedClock,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            store,
            sessions,
            rate_limiter,
            clock,
            policy,
            codes: Arc::new(RandomCodes),
        }
    }

    /// Replace the code generator
    pub fn with_code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.codes = codes;
        self
    }

    /// Mint a code for `account_id`, replacing any live one
    ///
    /// # Errors
    ///
    /// * `LinkError::AccountNotFound` - No such account
    /// * `LinkError::SourceInactive` - Account was merged away or disabled
    pub async fn create_link_code(&self, account_id: AccountId) -> LinkResult<IssuedLinkCode> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(LinkError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(LinkError::SourceInactive);
        }

        let identities = self.store.list_identities(account_id).await?;
        let hints = identity_hints(&identities);

        let mut collisions = 0;
        loop {
            let code = self.codes.next_code(self.policy.link_code_length);
            let Some(normalized) = normalize_code(&code) else {
                collisions += 1;
                if collisions >= MAX_CODE_COLLISIONS {
                    return Err(LinkError::Invalid);
                }
                continue;
            };

            let now = self.clock.now();
            let record = LinkCodeRecord {
                code_hash: hash_code(&normalized),
                source_account_id: account_id,
                source_identity_hints: hints.clone(),
                created_at: now,
                expires_at: now + self.policy.link_code_ttl,
                attempts_used: 0,
                max_attempts: self.policy.link_code_max_attempts,
            };

            match self.store.replace_link_code(&record).await {
                Ok(()) => {
                    log::info!("Link code issued for account {account_id}");
                    return Ok(IssuedLinkCode {
                        code,
                        expires_at: record.expires_at,
                    });
                }
                Err(StoreError::Conflict(_)) if collisions + 1 < MAX_CODE_COLLISIONS => {
                    collisions += 1;
                    log::debug!("Link code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolve a code for `requester`, spending one attempt
    ///
    /// A conflict is a successful preview flagged `manual_merge_required`.
    pub async fn preview_link_code(
        &self,
        code: &str,
        requester: AccountId,
    ) -> LinkResult<LinkPreview> {
        let resolved = self.resolve(code, requester).await?;

        let (replaces_telegram, conflict_reason) = match resolved.evaluation {
            Evaluation::Clean {
                replaces_telegram, ..
            } => (replaces_telegram, None),
            Evaluation::Conflict(reason) => (false, Some(reason)),
        };

        Ok(LinkPreview {
            source_user_id: resolved.source.id,
            source_identity_hints: resolved.record.source_identity_hints.clone(),
            replaces_telegram,
            manual_merge_required: conflict_reason.is_some(),
            conflict_reason,
            attempts_remaining: resolved.record.attempts_remaining(),
        })
    }

    /// Validate as preview, then merge the source into `requester`
    ///
    /// # Errors
    ///
    /// * `LinkError::ManualMergeRequired` - Accounts conflict
    /// * `LinkError::Invalid` - Another confirm consumed the code first
    pub async fn confirm_link_code(
        &self,
        code: &str,
        requester: AccountId,
    ) -> LinkResult<MergeResult> {
        let resolved = self.resolve(code, requester).await?;

        let (replaces_telegram, carry_assets) = match resolved.evaluation {
            Evaluation::Clean {
                replaces_telegram,
                carry_assets,
            } => (replaces_telegram, carry_assets),
            Evaluation::Conflict(reason) => {
                return Err(LinkError::ManualMergeRequired { reason });
            }
        };

        let plan = MergePlan {
            code_hash: resolved.record.code_hash.clone(),
            source_account_id: resolved.source.id,
            target_account_id: requester,
            replace_target_telegram: replaces_telegram,
            carry_assets,
            now: self.clock.now(),
        };

        let summary = match self.store.commit_merge(&plan).await? {
            MergeCommit::Committed(summary) => summary,
            MergeCommit::CodeConsumed => return Err(LinkError::Invalid),
            MergeCommit::SourceInactive => return Err(LinkError::SourceInactive),
            MergeCommit::TargetInactive => return Err(LinkError::TargetInactive),
            MergeCommit::BothHaveData => {
                log::warn!("Merge into {requester} found data on both accounts at commit time");
                return Err(LinkError::ManualMergeRequired {
                    reason: ConflictReason::BothHaveData,
                });
            }
            MergeCommit::IdentityCollision(provider) => {
                log::warn!("Merge into {requester} hit a {provider} collision at commit time");
                return Err(LinkError::ManualMergeRequired {
                    reason: ConflictReason::ProviderCollision,
                });
            }
        };

        log::info!(
            "Account {} merged into {} (providers: {:?}, telegram replaced: {})",
            plan.source_account_id,
            requester,
            summary.moved_providers,
            summary.replaced_telegram
        );

        let user = self
            .store
            .find_account(requester)
            .await?
            .ok_or(LinkError::AccountNotFound(requester))?;
        let tokens = self.sessions.issue(requester)?;

        Ok(MergeResult::new(tokens, user, summary))
    }

    /// Shared validation of preview and confirm
    async fn resolve(&self, code: &str, requester: AccountId) -> LinkResult<ResolvedCode> {
        if let RateLimitResult::Locked {
            retry_after,
            locked_until,
        } = self
            .rate_limiter
            .check_and_record(LINK_CODE_LOOKUP, &requester.to_string())
            .await?
        {
            return Err(LinkError::RateLimited {
                retry_after_seconds: retry_after,
                locked_until,
            });
        }

        let normalized = normalize_code(code).ok_or(LinkError::Invalid)?;
        let code_hash = hash_code(&normalized);

        // The attempt is spent before any other check
        let record = match self
            .store
            .consume_link_code_attempt(&code_hash, self.clock.now())
            .await?
        {
            AttemptOutcome::Accepted(record) => record,
            AttemptOutcome::Exhausted => return Err(LinkError::AttemptsExceeded),
            AttemptOutcome::Expired | AttemptOutcome::Unknown => return Err(LinkError::Invalid),
        };

        if record.source_account_id == requester {
            return Err(LinkError::SameAccount);
        }

        let source = match self.store.find_account(record.source_account_id).await? {
            Some(account) if account.is_active => account,
            _ => {
                // A concurrent confirm may have merged the source away and
                // consumed the code in between
                if self.store.find_link_code(&code_hash).await?.is_none() {
                    return Err(LinkError::Invalid);
                }
                return Err(LinkError::SourceInactive);
            }
        };
        let target = match self.store.find_account(requester).await? {
            Some(account) if account.is_active => account,
            _ => return Err(LinkError::TargetInactive),
        };

        let source_identities = self.store.list_identities(source.id).await?;
        let target_identities = self.store.list_identities(target.id).await?;
        let evaluation = ConflictResolver::decide(
            MergeSide {
                account: &source,
                identities: &source_identities,
            },
            MergeSide {
                account: &target,
                identities: &target_identities,
            },
        );

        Ok(ResolvedCode {
            record,
            source,
            evaluation,
        })
    }
}
