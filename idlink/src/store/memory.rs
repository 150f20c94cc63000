//! In-memory storage implementation.
//!
//! All state sits behind one mutex, so every trait method is a single
//! critical section and multi-record operations are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{
    AccountRepository, CooldownRepository, LinkCodeRepository, MaintenanceRepository,
    MergeTicketRepository, RATE_LIMIT_RETENTION_SECS, RateLimitRepository, StoreError,
    StoreResult, UnlinkRepository,
};
use crate::identity::{Account, AccountAssets, AccountId, CooldownKind, LinkedIdentity, Provider};
use crate::link::{AttemptOutcome, LinkCodeRecord, MergeCommit, MergePlan, MergeSummary};
use crate::merge_ticket::{MergeDecision, MergeTicket};
use crate::security::{RateLimitAttempt, RateLimitConfig, RateLimitResult};
use crate::unlink::{UnlinkCommit, UnlinkCommitOutcome, UnlinkRequestRecord};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    identities: BTreeMap<(AccountId, Provider), LinkedIdentity>,
    cooldowns: HashMap<(AccountId, CooldownKind), DateTime<Utc>>,
    link_codes: HashMap<String, LinkCodeRecord>,
    unlink_requests: HashMap<Uuid, UnlinkRequestRecord>,
    tickets: Vec<MergeTicket>,
    rate_limits: HashMap<(String, String), RateLimitAttempt>,
    next_account_id: AccountId,
}

impl State {
    fn identities_of(&self, account_id: AccountId) -> Vec<LinkedIdentity> {
        self.identities
            .range((account_id, Provider::Telegram)..)
            .take_while(|((id, _), _)| *id == account_id)
            .map(|(_, identity)| identity.clone())
            .collect()
    }

    fn external_id_taken(&self, provider: Provider, provider_user_id: &str) -> bool {
        self.identities
            .values()
            .any(|i| i.provider == provider && i.provider_user_id == provider_user_id)
    }
}

/// In-memory identity store
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_account_id: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of identity rows, across all accounts
    pub fn identity_count(&self) -> usize {
        self.state().identities.len()
    }

    /// Overwrite a link code's expiry (for testing purposes)
    pub fn set_link_code_expiry(&self, code_hash: &str, expires_at: DateTime<Utc>) {
        if let Some(record) = self.state().link_codes.get_mut(code_hash) {
            record.expires_at = expires_at;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create_account(
        &self,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let mut state = self.state();
        if state.external_id_taken(provider, provider_user_id) {
            return Err(StoreError::Conflict(format!(
                "{provider} identity already linked"
            )));
        }

        let id = state.next_account_id;
        state.next_account_id += 1;

        let account = Account {
            id,
            is_active: true,
            primary_auth: provider,
            assets: AccountAssets::default(),
            created_at: now,
        };
        state.accounts.insert(id, account.clone());
        state.identities.insert(
            (id, provider),
            LinkedIdentity {
                account_id: id,
                provider,
                provider_user_id: provider_user_id.to_string(),
                linked_at: now,
            },
        );
        Ok(account)
    }

    async fn find_account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.state().accounts.get(&account_id).cloned())
    }

    async fn find_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> StoreResult<Option<LinkedIdentity>> {
        Ok(self
            .state()
            .identities
            .values()
            .find(|i| i.provider == provider && i.provider_user_id == provider_user_id)
            .cloned())
    }

    async fn list_identities(&self, account_id: AccountId) -> StoreResult<Vec<LinkedIdentity>> {
        Ok(self.state().identities_of(account_id))
    }

    async fn attach_identity(&self, identity: &LinkedIdentity) -> StoreResult<()> {
        let mut state = self.state();
        if !state.accounts.contains_key(&identity.account_id) {
            return Err(StoreError::Conflict(format!(
                "account {} does not exist",
                identity.account_id
            )));
        }
        if state.external_id_taken(identity.provider, &identity.provider_user_id) {
            return Err(StoreError::Conflict(format!(
                "{} identity already linked",
                identity.provider
            )));
        }
        let key = (identity.account_id, identity.provider);
        if state.identities.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "account already holds a {} identity",
                identity.provider
            )));
        }
        state.identities.insert(key, identity.clone());
        Ok(())
    }

    async fn set_assets(&self, account_id: AccountId, assets: AccountAssets) -> StoreResult<()> {
        if let Some(account) = self.state().accounts.get_mut(&account_id) {
            account.assets = assets;
        }
        Ok(())
    }

    async fn set_primary_auth(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> StoreResult<()> {
        if let Some(account) = self.state().accounts.get_mut(&account_id) {
            account.primary_auth = provider;
        }
        Ok(())
    }
}

#[async_trait]
impl CooldownRepository for InMemoryStore {
    async fn get_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state().cooldowns.get(&(account_id, kind)).copied())
    }

    async fn set_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
        until: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state().cooldowns.insert((account_id, kind), until);
        Ok(())
    }
}

#[async_trait]
impl LinkCodeRepository for InMemoryStore {
    async fn replace_link_code(&self, record: &LinkCodeRecord) -> StoreResult<()> {
        let mut state = self.state();
        if let Some(existing) = state.link_codes.get(&record.code_hash)
            && existing.source_account_id != record.source_account_id
        {
            return Err(StoreError::Conflict("link code collision".to_string()));
        }
        state
            .link_codes
            .retain(|_, existing| existing.source_account_id != record.source_account_id);
        state
            .link_codes
            .insert(record.code_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_link_code(&self, code_hash: &str) -> StoreResult<Option<LinkCodeRecord>> {
        Ok(self.state().link_codes.get(code_hash).cloned())
    }

    async fn consume_link_code_attempt(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttemptOutcome> {
        let mut state = self.state();
        let Some(record) = state.link_codes.get_mut(code_hash) else {
            return Ok(AttemptOutcome::Unknown);
        };

        if record.is_expired(now) {
            state.link_codes.remove(code_hash);
            return Ok(AttemptOutcome::Expired);
        }
        if record.is_exhausted() {
            return Ok(AttemptOutcome::Exhausted);
        }

        record.attempts_used += 1;
        Ok(AttemptOutcome::Accepted(record.clone()))
    }

    async fn delete_link_code(&self, code_hash: &str) -> StoreResult<()> {
        self.state().link_codes.remove(code_hash);
        Ok(())
    }

    async fn commit_merge(&self, plan: &MergePlan) -> StoreResult<MergeCommit> {
        let mut state = self.state();

        match state.link_codes.get(&plan.code_hash) {
            Some(code) if code.source_account_id == plan.source_account_id => {}
            _ => return Ok(MergeCommit::CodeConsumed),
        }

        let (source, target) = match (
            state.accounts.get(&plan.source_account_id),
            state.accounts.get(&plan.target_account_id),
        ) {
            (Some(source), Some(target)) => (source.clone(), target.clone()),
            (None, _) => return Ok(MergeCommit::SourceInactive),
            (_, None) => return Ok(MergeCommit::TargetInactive),
        };
        if !source.is_active {
            return Ok(MergeCommit::SourceInactive);
        }
        if !target.is_active {
            return Ok(MergeCommit::TargetInactive);
        }

        // Assets may have changed since the plan was evaluated
        if source.assets.has_data() && target.assets.has_data() {
            return Ok(MergeCommit::BothHaveData);
        }
        let carry_assets = plan.carry_assets && source.assets.has_data();

        let source_identities = state.identities_of(source.id);
        let mut replaced_telegram = false;
        for identity in &source_identities {
            if let Some(existing) = state.identities.get(&(target.id, identity.provider)) {
                let same = existing.provider_user_id == identity.provider_user_id;
                if identity.provider.is_telegram() && plan.replace_target_telegram && !same {
                    replaced_telegram = true;
                } else {
                    return Ok(MergeCommit::IdentityCollision(identity.provider));
                }
            }
        }

        // Validation done; apply every change under the same lock
        state.link_codes.remove(&plan.code_hash);
        if replaced_telegram {
            state.identities.remove(&(target.id, Provider::Telegram));
        }

        let mut moved_providers = Vec::with_capacity(source_identities.len());
        for identity in source_identities {
            state.identities.remove(&(source.id, identity.provider));
            moved_providers.push(identity.provider);
            state.identities.insert(
                (target.id, identity.provider),
                LinkedIdentity {
                    account_id: target.id,
                    ..identity
                },
            );
        }

        for kind in [CooldownKind::Unlink, CooldownKind::TelegramRelink] {
            if let Some(source_until) = state.cooldowns.remove(&(source.id, kind)) {
                let entry = state.cooldowns.entry((target.id, kind)).or_insert(source_until);
                *entry = (*entry).max(source_until);
            }
        }

        state
            .unlink_requests
            .retain(|_, request| request.account_id != source.id);

        if let Some(target_account) = state.accounts.get_mut(&target.id)
            && carry_assets
        {
            target_account.assets = source.assets;
        }
        if let Some(source_account) = state.accounts.get_mut(&source.id) {
            source_account.is_active = false;
            if carry_assets {
                source_account.assets = AccountAssets::default();
            }
        }

        Ok(MergeCommit::Committed(MergeSummary {
            moved_providers,
            replaced_telegram,
            assets_carried: carry_assets,
        }))
    }
}

#[async_trait]
impl UnlinkRepository for InMemoryStore {
    async fn find_unlink_request(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> StoreResult<Option<UnlinkRequestRecord>> {
        Ok(self
            .state()
            .unlink_requests
            .values()
            .find(|r| r.account_id == account_id && r.provider == provider)
            .cloned())
    }

    async fn find_unlink_request_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<UnlinkRequestRecord>> {
        Ok(self
            .state()
            .unlink_requests
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn insert_unlink_request(
        &self,
        record: &UnlinkRequestRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        let existing = state
            .unlink_requests
            .values()
            .find(|r| r.account_id == record.account_id && r.provider == record.provider)
            .map(|r| (r.id, r.is_expired(now)));

        match existing {
            Some((_, false)) => return Ok(false),
            Some((id, true)) => {
                state.unlink_requests.remove(&id);
            }
            None => {}
        }

        state.unlink_requests.insert(record.id, record.clone());
        Ok(true)
    }

    async fn reissue_unlink_otp(
        &self,
        request_id: Uuid,
        token_hash: &str,
        otp_hash: &str,
        resend_available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        match state.unlink_requests.get_mut(&request_id) {
            Some(request) if !request.is_expired(now) && request.can_resend(now) => {
                request.token_hash = token_hash.to_string();
                request.otp_hash = otp_hash.to_string();
                request.resend_available_at = resend_available_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failed_otp(&self, request_id: Uuid) -> StoreResult<Option<u32>> {
        let mut state = self.state();
        match state.unlink_requests.get_mut(&request_id) {
            Some(request) if request.attempts_remaining > 0 => {
                request.attempts_remaining -= 1;
                Ok(Some(request.attempts_remaining))
            }
            _ => Ok(None),
        }
    }

    async fn delete_unlink_request(&self, request_id: Uuid) -> StoreResult<()> {
        self.state().unlink_requests.remove(&request_id);
        Ok(())
    }

    async fn complete_unlink(&self, commit: &UnlinkCommit) -> StoreResult<UnlinkCommitOutcome> {
        let mut state = self.state();

        let Some(request) = state.unlink_requests.remove(&commit.request_id) else {
            return Ok(UnlinkCommitOutcome::RequestGone);
        };
        if request.attempts_remaining == 0 {
            return Ok(UnlinkCommitOutcome::AttemptsExhausted);
        }

        let key = (commit.account_id, commit.provider);
        if !state.identities.contains_key(&key) {
            return Ok(UnlinkCommitOutcome::IdentityGone);
        }
        if state.identities_of(commit.account_id).len() <= 1 {
            return Ok(UnlinkCommitOutcome::LastIdentity);
        }

        state.identities.remove(&key);
        state.cooldowns.insert(
            (commit.account_id, CooldownKind::Unlink),
            commit.unlink_cooldown_until,
        );
        if let Some(until) = commit.telegram_relink_until {
            state
                .cooldowns
                .insert((commit.account_id, CooldownKind::TelegramRelink), until);
        }

        Ok(UnlinkCommitOutcome::Completed)
    }
}

#[async_trait]
impl MergeTicketRepository for InMemoryStore {
    async fn create_ticket_consuming_code(
        &self,
        code_hash: &str,
        ticket: &MergeTicket,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        if !state.link_codes.contains_key(code_hash) {
            return Ok(false);
        }
        if state.tickets.iter().any(|t| {
            t.requester_account_id == ticket.requester_account_id
                && t.decision == MergeDecision::Pending
        }) {
            return Err(StoreError::Conflict(
                "requester already has a pending ticket".to_string(),
            ));
        }
        state.link_codes.remove(code_hash);
        state.tickets.push(ticket.clone());
        Ok(true)
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<MergeTicket>> {
        Ok(self
            .state()
            .tickets
            .iter()
            .find(|t| t.id == ticket_id)
            .cloned())
    }

    async fn latest_ticket_for_requester(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>> {
        Ok(self
            .state()
            .tickets
            .iter()
            .filter(|t| t.requester_account_id == account_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn latest_ticket_for_pair(
        &self,
        requester_account_id: AccountId,
        source_account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>> {
        Ok(self
            .state()
            .tickets
            .iter()
            .filter(|t| {
                t.requester_account_id == requester_account_id
                    && t.source_account_id == source_account_id
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn decide_ticket(
        &self,
        ticket_id: Uuid,
        decision: MergeDecision,
        resolution_comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MergeTicket>> {
        let mut state = self.state();
        match state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id && t.decision == MergeDecision::Pending)
        {
            Some(ticket) => {
                ticket.decision = decision;
                ticket.resolution_comment = resolution_comment.map(str::to_string);
                ticket.updated_at = now;
                Ok(Some(ticket.clone()))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RateLimitRepository for InMemoryStore {
    async fn load_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> StoreResult<Option<RateLimitAttempt>> {
        Ok(self
            .state()
            .rate_limits
            .get(&(endpoint.to_string(), identifier.to_string()))
            .cloned())
    }

    async fn record_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitResult> {
        let mut state = self.state();
        let key = (endpoint.to_string(), identifier.to_string());
        let current = state
            .rate_limits
            .get(&key)
            .cloned()
            .unwrap_or_else(|| RateLimitAttempt::fresh(now));

        let (next, result) = current.advance(config, now);
        if let Some(next) = next {
            state.rate_limits.insert(key, next);
        }
        Ok(result)
    }

    async fn delete_attempt(&self, endpoint: &str, identifier: &str) -> StoreResult<()> {
        self.state()
            .rate_limits
            .remove(&(endpoint.to_string(), identifier.to_string()));
        Ok(())
    }
}

#[async_trait]
impl MaintenanceRepository for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state();
        let before =
            state.link_codes.len() + state.unlink_requests.len() + state.rate_limits.len();

        state.link_codes.retain(|_, code| !code.is_expired(now));
        state
            .unlink_requests
            .retain(|_, request| !request.is_expired(now));
        // Idle rows go only after the retention period so backoff history survives
        let idle_before = now - Duration::seconds(RATE_LIMIT_RETENTION_SECS);
        state.rate_limits.retain(|_, attempt| {
            attempt.locked_until.is_some_and(|until| until > now)
                || attempt.window_start > idle_before
        });

        let after =
            state.link_codes.len() + state.unlink_requests.len() + state.rate_limits.len();
        Ok((before - after) as u64)
    }
}
