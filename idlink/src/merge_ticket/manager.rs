//! Manual merge ticket manager implementation.

use super::{
    errors::{MergeTicketError, MergeTicketResult},
    models::{MergeDecision, MergeTicket, SubmittedTicket, TicketStatus},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::LinkPolicy;
use crate::conflict::{ConflictResolver, Evaluation};
use crate::identity::AccountId;
use crate::link::{hash_code, normalize_code};
use crate::notify::SupportDesk;
use crate::security::{LINK_CODE_LOOKUP, RateLimitResult, RateLimiter};
use crate::store::{IdentityStore, StoreError};

/// Submits manual merge tickets and records adjudicator decisions
pub struct MergeTicketManager {
    store: Arc<dyn IdentityStore>,
    resolver: ConflictResolver,
    support_desk: Arc<dyn SupportDesk>,
    rate_limiter: Arc<RateLimiter>,
    clock: SharedClock,
    policy: LinkPolicy,
}

impl MergeTicketManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        support_desk: Arc<dyn SupportDesk>,
        rate_limiter: Arc<RateLimiter>,
        clock: SharedClock,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(store.clone()),
            store,
            support_desk,
            rate_limiter,
            clock,
            policy,
        }
    }

    /// Raise a ticket for a code whose accounts conflict
    ///
    /// The code is validated without spending an attempt, then deleted
    /// together with the ticket insert. Each submission counts against the
    /// requester's link code lookup limit shared with preview and confirm.
    ///
    /// # Errors
    ///
    /// * `MergeTicketError::SupportDisabled` - Ticketing is turned off
    /// * `MergeTicketError::CommentTooLong` - Comment exceeds the policy limit
    /// * `MergeTicketError::RateLimited` - Too many code lookups by the requester
    /// * `MergeTicketError::NotRequired` - Accounts merge cleanly
    /// * `MergeTicketError::AlreadyPending` - Requester already waits on a ticket
    /// * `MergeTicketError::Rejected` - Pair was rejected and resubmission is off
    pub async fn submit(
        &self,
        code: &str,
        requester: AccountId,
        comment: Option<&str>,
    ) -> MergeTicketResult<SubmittedTicket> {
        if !self.policy.support_enabled {
            return Err(MergeTicketError::SupportDisabled);
        }

        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if let Some(comment) = comment
            && comment.chars().count() > self.policy.max_comment_chars
        {
            return Err(MergeTicketError::CommentTooLong {
                max: self.policy.max_comment_chars,
            });
        }

        if let RateLimitResult::Locked {
            retry_after,
            locked_until,
        } = self
            .rate_limiter
            .check_and_record(LINK_CODE_LOOKUP, &requester.to_string())
            .await?
        {
            return Err(MergeTicketError::RateLimited {
                retry_after_seconds: retry_after,
                locked_until,
            });
        }

        let normalized = normalize_code(code).ok_or(MergeTicketError::CodeInvalid)?;
        let code_hash = hash_code(&normalized);
        let now = self.clock.now();

        let record = self
            .store
            .find_link_code(&code_hash)
            .await?
            .filter(|record| !record.is_expired(now))
            .ok_or(MergeTicketError::CodeInvalid)?;
        if record.is_exhausted() {
            return Err(MergeTicketError::CodeAttemptsExceeded);
        }
        let source_id = record.source_account_id;
        if source_id == requester {
            return Err(MergeTicketError::SameAccount);
        }

        match self.store.find_account(source_id).await? {
            Some(account) if account.is_active => {}
            _ => return Err(MergeTicketError::SourceInactive),
        }
        match self.store.find_account(requester).await? {
            Some(account) if account.is_active => {}
            _ => return Err(MergeTicketError::TargetInactive),
        }

        let reason = match self.resolver.evaluate(source_id, requester).await? {
            Some(Evaluation::Conflict(reason)) => reason,
            Some(Evaluation::Clean { .. }) => return Err(MergeTicketError::NotRequired),
            None => return Err(MergeTicketError::SourceInactive),
        };

        if let Some(latest) = self.store.latest_ticket_for_requester(requester).await?
            && latest.decision == MergeDecision::Pending
        {
            return Err(MergeTicketError::AlreadyPending);
        }
        if !self.policy.allow_resubmit_after_reject
            && let Some(previous) = self
                .store
                .latest_ticket_for_pair(requester, source_id)
                .await?
            && previous.decision == MergeDecision::Reject
        {
            return Err(MergeTicketError::Rejected);
        }

        let ticket = MergeTicket {
            id: Uuid::new_v4(),
            requester_account_id: requester,
            source_account_id: source_id,
            comment: comment.map(str::to_string),
            decision: MergeDecision::Pending,
            resolution_comment: None,
            created_at: now,
            updated_at: now,
        };

        match self
            .store
            .create_ticket_consuming_code(&code_hash, &ticket)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(MergeTicketError::CodeInvalid),
            Err(StoreError::Conflict(_)) => return Err(MergeTicketError::AlreadyPending),
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "Manual merge ticket {} raised by account {requester} for source {source_id} ({})",
            ticket.id,
            reason.as_str()
        );

        let desk = self.support_desk.clone();
        let notified = ticket.clone();
        tokio::spawn(async move {
            if let Err(e) = desk.ticket_created(&notified).await {
                log::warn!("Support desk notification for {} failed: {e}", notified.id);
            }
        });

        Ok(SubmittedTicket {
            ticket_id: ticket.id,
        })
    }

    /// Latest ticket raised by the account
    pub async fn get_latest(&self, account_id: AccountId) -> MergeTicketResult<Option<TicketStatus>> {
        Ok(self
            .store
            .latest_ticket_for_requester(account_id)
            .await?
            .map(TicketStatus::from))
    }

    /// Record the adjudicator's decision on a pending ticket
    ///
    /// # Errors
    ///
    /// * `MergeTicketError::InvalidDecision` - Decision is `pending`
    /// * `MergeTicketError::NotFound` - Unknown ticket
    /// * `MergeTicketError::AlreadyDecided` - Ticket is no longer pending
    pub async fn record_decision(
        &self,
        ticket_id: Uuid,
        decision: MergeDecision,
        resolution_comment: Option<&str>,
    ) -> MergeTicketResult<TicketStatus> {
        if decision == MergeDecision::Pending {
            return Err(MergeTicketError::InvalidDecision);
        }

        let resolution_comment = resolution_comment.map(str::trim).filter(|c| !c.is_empty());
        if let Some(comment) = resolution_comment
            && comment.chars().count() > self.policy.max_comment_chars
        {
            return Err(MergeTicketError::CommentTooLong {
                max: self.policy.max_comment_chars,
            });
        }

        let decided = self
            .store
            .decide_ticket(ticket_id, decision, resolution_comment, self.clock.now())
            .await?;

        match decided {
            Some(ticket) => {
                log::info!("Manual merge ticket {ticket_id} decided: {decision}");
                Ok(TicketStatus::from(ticket))
            }
            None => match self.store.find_ticket(ticket_id).await? {
                Some(_) => Err(MergeTicketError::AlreadyDecided),
                None => Err(MergeTicketError::NotFound(ticket_id)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::errors::ErrorCode;
    use crate::identity::{AccountAssets, Provider};
    use crate::link::{IdentityHints, LinkCodeRecord};
    use crate::notify::CapturingSupportDesk;
    use crate::store::{AccountRepository, InMemoryStore, LinkCodeRepository, RateLimitRepository};
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: ManualClock,
        desk: Arc<CapturingSupportDesk>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                clock: ManualClock::new(Utc::now()),
                desk: Arc::new(CapturingSupportDesk::new()),
            }
        }

        fn manager(&self, policy: LinkPolicy) -> MergeTicketManager {
            let clock: SharedClock = Arc::new(self.clock.clone());
            MergeTicketManager::new(
                self.store.clone(),
                self.desk.clone(),
                Arc::new(RateLimiter::new(self.store.clone(), clock.clone())),
                clock,
                policy,
            )
        }

        async fn paid_account(&self, provider: Provider, external: &str) -> AccountId {
            let id = self
                .store
                .create_account(provider, external, self.clock.now())
                .await
                .unwrap()
                .id;
            self.store
                .set_assets(
                    id,
                    AccountAssets {
                        active_subscription: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            id
        }

        async fn code(&self, code: &str, source: AccountId) {
            let now = self.clock.now();
            self.store
                .replace_link_code(&LinkCodeRecord {
                    code_hash: hash_code(code),
                    source_account_id: source,
                    source_identity_hints: IdentityHints::new(),
                    created_at: now,
                    expires_at: now + Duration::minutes(10),
                    attempts_used: 1,
                    max_attempts: 5,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_consumes_code() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f.paid_account(Provider::Telegram, "1").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("XYZ999", a).await;

        let submitted = manager
            .submit("XYZ999", b, Some("B is primary"))
            .await
            .unwrap();
        assert!(f.store.find_link_code(&hash_code("XYZ999")).await.unwrap().is_none());

        let latest = manager.get_latest(b).await.unwrap().unwrap();
        assert_eq!(latest.ticket_id, submitted.ticket_id);
        assert_eq!(latest.decision, MergeDecision::Pending);
    }

    #[tokio::test]
    async fn test_submit_requires_conflict() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f
            .store
            .create_account(Provider::Telegram, "1", f.clock.now())
            .await
            .unwrap()
            .id;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("CLEAN1", a).await;

        let err = manager.submit("CLEAN1", b, None).await.unwrap_err();
        assert_eq!(err.code(), "manual_merge_not_required");
        assert!(f.store.find_link_code(&hash_code("CLEAN1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_support_disabled() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy {
            support_enabled: false,
            ..Default::default()
        });
        let err = manager.submit("XYZ999", 1, None).await.unwrap_err();
        assert_eq!(err.code(), "support_disabled");
    }

    #[tokio::test]
    async fn test_comment_too_long() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f.paid_account(Provider::Telegram, "1").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("XYZ999", a).await;

        let comment = "x".repeat(2001);
        let err = manager.submit("XYZ999", b, Some(&comment)).await.unwrap_err();
        assert!(matches!(err, MergeTicketError::CommentTooLong { max: 2000 }));

        // Rejected before the code is looked up at all
        let err = manager.submit("NOSUCH1", b, Some(&comment)).await.unwrap_err();
        assert!(matches!(err, MergeTicketError::CommentTooLong { .. }));
        assert!(f.store.load_attempt(LINK_CODE_LOOKUP, &b.to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submission_guessing_is_rate_limited() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f.paid_account(Provider::Telegram, "1").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("REAL22", a).await;

        for _ in 0..20 {
            let err = manager.submit("ZZZZZZ", b, None).await.unwrap_err();
            assert!(matches!(err, MergeTicketError::CodeInvalid));
        }

        // The live code gets the same refusal as any other during the lockout
        let err = manager.submit("REAL22", b, None).await.unwrap_err();
        assert_eq!(err.code(), "link_code_rate_limited");
        assert_eq!(err.retry_after_seconds(), Some(1800));
        assert!(f.store.find_link_code(&hash_code("REAL22")).await.unwrap().is_some());

        f.clock.advance(Duration::seconds(1801));
        f.code("REAL22", a).await;
        assert!(manager.submit("REAL22", b, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_blocks_second_ticket() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f.paid_account(Provider::Telegram, "1").await;
        let c = f.paid_account(Provider::Vk, "vk-c").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("FIRST1", a).await;
        f.code("OTHER2", c).await;

        manager.submit("FIRST1", b, None).await.unwrap();
        let err = manager.submit("OTHER2", b, None).await.unwrap_err();
        assert!(matches!(err, MergeTicketError::AlreadyPending));
    }

    #[tokio::test]
    async fn test_resubmit_after_reject_policy() {
        let f = Fixture::new();
        let strict = f.manager(LinkPolicy {
            allow_resubmit_after_reject: false,
            ..Default::default()
        });
        let a = f.paid_account(Provider::Telegram, "1").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;

        f.code("ROUND1", a).await;
        let first = strict.submit("ROUND1", b, None).await.unwrap();
        strict
            .record_decision(first.ticket_id, MergeDecision::Reject, Some("not the same person"))
            .await
            .unwrap();

        f.code("ROUND2", a).await;
        let err = strict.submit("ROUND2", b, None).await.unwrap_err();
        assert!(matches!(err, MergeTicketError::Rejected));

        let lenient = f.manager(LinkPolicy::default());
        assert!(lenient.submit("ROUND2", b, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_decision_only_from_pending() {
        let f = Fixture::new();
        let manager = f.manager(LinkPolicy::default());
        let a = f.paid_account(Provider::Telegram, "1").await;
        let b = f.paid_account(Provider::Email, "b@example.com").await;
        f.code("XYZ999", a).await;
        let ticket = manager.submit("XYZ999", b, None).await.unwrap();

        let err = manager
            .record_decision(ticket.ticket_id, MergeDecision::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeTicketError::InvalidDecision));

        let status = manager
            .record_decision(ticket.ticket_id, MergeDecision::Approve, Some("verified"))
            .await
            .unwrap();
        assert_eq!(status.decision, MergeDecision::Approve);
        assert_eq!(status.resolution_comment.as_deref(), Some("verified"));

        let err = manager
            .record_decision(ticket.ticket_id, MergeDecision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeTicketError::AlreadyDecided));

        let err = manager
            .record_decision(Uuid::new_v4(), MergeDecision::Reject, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "manual_merge_not_found");
    }
}
