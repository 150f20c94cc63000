//! Durable storage for accounts, identities and the short-lived security
//! records of the linking protocol.
//!
//! The repository traits split storage by concern, following the
//! repository pattern used for users and sessions. [`IdentityStore`] is the
//! union every manager depends on. Two implementations exist:
//! [`InMemoryStore`] for tests and development, and [`PgStore`] for
//! PostgreSQL.
//!
//! Operations that must be atomic (attempt counters, merge commit, unlink
//! commit, ticket submission) are single trait methods so each backend can
//! run them inside one critical section or transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::identity::{Account, AccountAssets, AccountId, CooldownKind, LinkedIdentity, Provider};
use crate::link::{AttemptOutcome, LinkCodeRecord, MergeCommit, MergePlan};
use crate::merge_ticket::{MergeDecision, MergeTicket};
use crate::security::{RateLimitAttempt, RateLimitConfig, RateLimitResult};
use crate::unlink::{UnlinkCommit, UnlinkCommitOutcome, UnlinkRequestRecord};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Uniqueness violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Idle time after which [`MaintenanceRepository::purge_expired`] drops a
/// rate limit row. Must exceed every configured window, so a purge never
/// resets backoff that the limiter would still honour.
pub const RATE_LIMIT_RETENTION_SECS: i64 = 86_400;

/// Accounts and their identities
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Register an account whose first identity is also its primary auth method
    async fn create_account(
        &self,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Account>;

    /// Find account by ID
    async fn find_account(&self, account_id: AccountId) -> StoreResult<Option<Account>>;

    /// Find the identity bound to an external id
    async fn find_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> StoreResult<Option<LinkedIdentity>>;

    /// Identities attached to an account, ordered by provider
    async fn list_identities(&self, account_id: AccountId) -> StoreResult<Vec<LinkedIdentity>>;

    /// Attach an identity.
    ///
    /// Fails with [`StoreError::Conflict`] when the external id is taken or
    /// the account already holds that provider.
    async fn attach_identity(&self, identity: &LinkedIdentity) -> StoreResult<()>;

    /// Replace the monetizable state of an account
    async fn set_assets(&self, account_id: AccountId, assets: AccountAssets) -> StoreResult<()>;

    /// Change the primary auth method
    async fn set_primary_auth(&self, account_id: AccountId, provider: Provider)
    -> StoreResult<()>;
}

/// Durable cooldown timestamps
#[async_trait]
pub trait CooldownRepository: Send + Sync {
    /// End of a cooldown, if one was ever recorded
    async fn get_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Record the end of a cooldown
    async fn set_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
        until: DateTime<Utc>,
    ) -> StoreResult<()>;
}

/// Link codes and the merge they lead to
#[async_trait]
pub trait LinkCodeRepository: Send + Sync {
    /// Store a code, replacing any code already held by the same source account
    async fn replace_link_code(&self, record: &LinkCodeRecord) -> StoreResult<()>;

    /// Look a code up without consuming an attempt
    async fn find_link_code(&self, code_hash: &str) -> StoreResult<Option<LinkCodeRecord>>;

    /// Atomically spend one attempt on a code
    async fn consume_link_code_attempt(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttemptOutcome>;

    /// Drop a code
    async fn delete_link_code(&self, code_hash: &str) -> StoreResult<()>;

    /// Delete the code and merge source into target in one transaction
    async fn commit_merge(&self, plan: &MergePlan) -> StoreResult<MergeCommit>;
}

/// Pending unlink requests
#[async_trait]
pub trait UnlinkRepository: Send + Sync {
    /// Live or expired request for an (account, provider) pair
    async fn find_unlink_request(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> StoreResult<Option<UnlinkRequestRecord>>;

    /// Request by token digest
    async fn find_unlink_request_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<UnlinkRequestRecord>>;

    /// Insert a request unless a live one exists for the same pair.
    ///
    /// An expired request for the pair is replaced. Returns `false` when a
    /// live request won.
    async fn insert_unlink_request(
        &self,
        record: &UnlinkRequestRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Rotate token and OTP of a live request whose resend timer has elapsed.
    ///
    /// Attempt counter and expiry are untouched. Returns `false` when the
    /// request is gone or the timer is still running.
    async fn reissue_unlink_otp(
        &self,
        request_id: Uuid,
        token_hash: &str,
        otp_hash: &str,
        resend_available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Atomically spend one OTP attempt; returns attempts left, or `None`
    /// when the request no longer exists or was already exhausted
    async fn record_failed_otp(&self, request_id: Uuid) -> StoreResult<Option<u32>>;

    /// Drop a request
    async fn delete_unlink_request(&self, request_id: Uuid) -> StoreResult<()>;

    /// Delete the request, detach the identity and start cooldowns in one transaction
    async fn complete_unlink(&self, commit: &UnlinkCommit) -> StoreResult<UnlinkCommitOutcome>;
}

/// Manual merge tickets
#[async_trait]
pub trait MergeTicketRepository: Send + Sync {
    /// Delete the code and create the ticket atomically; `false` when the
    /// code was already gone.
    ///
    /// Fails with [`StoreError::Conflict`] when the requester already has a
    /// pending ticket.
    async fn create_ticket_consuming_code(
        &self,
        code_hash: &str,
        ticket: &MergeTicket,
    ) -> StoreResult<bool>;

    /// Ticket by ID
    async fn find_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<MergeTicket>>;

    /// Most recently created ticket raised by an account
    async fn latest_ticket_for_requester(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>>;

    /// Most recently created ticket for a requester/source pair
    async fn latest_ticket_for_pair(
        &self,
        requester_account_id: AccountId,
        source_account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>>;

    /// Move a pending ticket to a decision; `None` when it was not pending
    async fn decide_ticket(
        &self,
        ticket_id: Uuid,
        decision: MergeDecision,
        resolution_comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MergeTicket>>;
}

/// Rate limit windows
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn load_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> StoreResult<Option<RateLimitAttempt>>;

    /// Count one attempt, checking and updating the window in one step
    async fn record_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitResult>;

    async fn delete_attempt(&self, endpoint: &str, identifier: &str) -> StoreResult<()>;
}

/// Health and hygiene
#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    /// Verify the backend is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Delete expired codes, requests and lockouts; returns rows removed.
    ///
    /// Not needed for correctness, expiry is always checked on access.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Everything the linking managers need from storage
pub trait IdentityStore:
    AccountRepository
    + CooldownRepository
    + LinkCodeRepository
    + UnlinkRepository
    + MergeTicketRepository
    + RateLimitRepository
    + MaintenanceRepository
{
}

impl<T> IdentityStore for T where
    T: AccountRepository
        + CooldownRepository
        + LinkCodeRepository
        + UnlinkRepository
        + MergeTicketRepository
        + RateLimitRepository
        + MaintenanceRepository
{
}
