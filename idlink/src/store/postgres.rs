//! PostgreSQL storage implementation.
//!
//! Timestamps are stored as `TIMESTAMP` in UTC and converted with
//! `naive_utc()` / `and_utc()`. Multi-row operations run in one transaction;
//! an early return drops the transaction and rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    AccountRepository, CooldownRepository, LinkCodeRepository, MaintenanceRepository,
    MergeTicketRepository, RATE_LIMIT_RETENTION_SECS, RateLimitRepository, StoreError,
    StoreResult, UnlinkRepository,
};
use crate::identity::{Account, AccountAssets, AccountId, CooldownKind, LinkedIdentity, Provider};
use crate::link::{
    AttemptOutcome, IdentityHints, LinkCodeRecord, MergeCommit, MergePlan, MergeSummary,
};
use crate::merge_ticket::{MergeDecision, MergeTicket};
use crate::security::{RateLimitAttempt, RateLimitConfig, RateLimitResult};
use crate::unlink::{UnlinkCommit, UnlinkCommitOutcome, UnlinkRequestRecord};

const ACCOUNT_COLUMNS: &str =
    "id, is_active, primary_auth, active_subscription, referral_count, balance_minor, created_at";

const RATE_LIMIT_COLUMNS: &str =
    "attempts, window_start, locked_until, consecutive_violations";

const LINK_CODE_COLUMNS: &str = "code_hash, source_account_id, source_identity_hints, \
     created_at, expires_at, attempts_used, max_attempts";

const UNLINK_COLUMNS: &str = "id, token_hash, account_id, provider, otp_hash, created_at, \
     expires_at, attempts_remaining, resend_available_at";

const TICKET_COLUMNS: &str = "id, requester_account_id, source_account_id, comment, decision, \
     resolution_comment, created_at, updated_at";

/// PostgreSQL identity store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn ts(row: &PgRow, column: &str) -> StoreResult<DateTime<Utc>> {
    Ok(row.try_get::<NaiveDateTime, _>(column)?.and_utc())
}

fn provider(row: &PgRow, column: &str) -> StoreResult<Provider> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: crate::identity::UnknownProvider| StoreError::Corrupt(e.to_string()))
}

fn count(row: &PgRow, column: &str) -> StoreResult<u32> {
    let raw: i32 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative {column}: {raw}")))
}

fn attempt_from_row(row: &PgRow) -> StoreResult<RateLimitAttempt> {
    Ok(RateLimitAttempt {
        attempts: count(row, "attempts")?,
        window_start: ts(row, "window_start")?,
        locked_until: row
            .try_get::<Option<NaiveDateTime>, _>("locked_until")?
            .map(|dt| dt.and_utc()),
        consecutive_violations: count(row, "consecutive_violations")?,
    })
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        is_active: row.try_get("is_active")?,
        primary_auth: provider(row, "primary_auth")?,
        assets: AccountAssets {
            active_subscription: row.try_get("active_subscription")?,
            referral_count: count(row, "referral_count")?,
            balance_minor: row.try_get("balance_minor")?,
        },
        created_at: ts(row, "created_at")?,
    })
}

fn identity_from_row(row: &PgRow) -> StoreResult<LinkedIdentity> {
    Ok(LinkedIdentity {
        account_id: row.try_get("account_id")?,
        provider: provider(row, "provider")?,
        provider_user_id: row.try_get("provider_user_id")?,
        linked_at: ts(row, "linked_at")?,
    })
}

fn link_code_from_row(row: &PgRow) -> StoreResult<LinkCodeRecord> {
    let hints: Json<IdentityHints> = row.try_get("source_identity_hints")?;
    Ok(LinkCodeRecord {
        code_hash: row.try_get("code_hash")?,
        source_account_id: row.try_get("source_account_id")?,
        source_identity_hints: hints.0,
        created_at: ts(row, "created_at")?,
        expires_at: ts(row, "expires_at")?,
        attempts_used: count(row, "attempts_used")?,
        max_attempts: count(row, "max_attempts")?,
    })
}

fn unlink_from_row(row: &PgRow) -> StoreResult<UnlinkRequestRecord> {
    Ok(UnlinkRequestRecord {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        account_id: row.try_get("account_id")?,
        provider: provider(row, "provider")?,
        otp_hash: row.try_get("otp_hash")?,
        created_at: ts(row, "created_at")?,
        expires_at: ts(row, "expires_at")?,
        attempts_remaining: count(row, "attempts_remaining")?,
        resend_available_at: ts(row, "resend_available_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> StoreResult<MergeTicket> {
    let decision: String = row.try_get("decision")?;
    Ok(MergeTicket {
        id: row.try_get("id")?,
        requester_account_id: row.try_get("requester_account_id")?,
        source_account_id: row.try_get("source_account_id")?,
        comment: row.try_get("comment")?,
        decision: decision.parse().map_err(StoreError::Corrupt)?,
        resolution_comment: row.try_get("resolution_comment")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
    })
}

/// Turn uniqueness and foreign key violations into [`StoreError::Conflict`]
fn conflict_or(err: sqlx::Error, message: impl Into<String>) -> StoreError {
    match &err {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StoreError::Conflict(message.into())
        }
        _ => StoreError::Database(err),
    }
}

fn as_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn create_account(
        &self,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO accounts (primary_auth, created_at) VALUES ($1, $2) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(provider.as_str())
        .bind(now.naive_utc())
        .fetch_one(&mut *tx)
        .await?;
        let account = account_from_row(&row)?;

        sqlx::query(
            "INSERT INTO identities (account_id, provider, provider_user_id, linked_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(account.id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, format!("{provider} identity already linked")))?;

        tx.commit().await?;
        Ok(account)
    }

    async fn find_account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> StoreResult<Option<LinkedIdentity>> {
        let row = sqlx::query(
            "SELECT account_id, provider, provider_user_id, linked_at
             FROM identities WHERE provider = $1 AND provider_user_id = $2",
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn list_identities(&self, account_id: AccountId) -> StoreResult<Vec<LinkedIdentity>> {
        let rows = sqlx::query(
            "SELECT account_id, provider, provider_user_id, linked_at
             FROM identities WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut identities = rows
            .iter()
            .map(identity_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        identities.sort_by_key(|i| i.provider);
        Ok(identities)
    }

    async fn attach_identity(&self, identity: &LinkedIdentity) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO identities (account_id, provider, provider_user_id, linked_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(identity.account_id)
        .bind(identity.provider.as_str())
        .bind(&identity.provider_user_id)
        .bind(identity.linked_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, format!("{} identity conflict", identity.provider)))?;
        Ok(())
    }

    async fn set_assets(&self, account_id: AccountId, assets: AccountAssets) -> StoreResult<()> {
        sqlx::query(
            "UPDATE accounts
             SET active_subscription = $1, referral_count = $2, balance_minor = $3
             WHERE id = $4",
        )
        .bind(assets.active_subscription)
        .bind(as_i32(assets.referral_count))
        .bind(assets.balance_minor)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_primary_auth(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE accounts SET primary_auth = $1 WHERE id = $2")
            .bind(provider.as_str())
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CooldownRepository for PgStore {
    async fn get_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT until FROM cooldowns WHERE account_id = $1 AND kind = $2")
            .bind(account_id)
            .bind(kind.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| ts(r, "until")).transpose()
    }

    async fn set_cooldown(
        &self,
        account_id: AccountId,
        kind: CooldownKind,
        until: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO cooldowns (account_id, kind, until) VALUES ($1, $2, $3)
             ON CONFLICT (account_id, kind) DO UPDATE SET until = EXCLUDED.until",
        )
        .bind(account_id)
        .bind(kind.to_string())
        .bind(until.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LinkCodeRepository for PgStore {
    async fn replace_link_code(&self, record: &LinkCodeRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM link_codes WHERE source_account_id = $1")
            .bind(record.source_account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO link_codes
                (code_hash, source_account_id, source_identity_hints, created_at,
                 expires_at, attempts_used, max_attempts)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.code_hash)
        .bind(record.source_account_id)
        .bind(Json(&record.source_identity_hints))
        .bind(record.created_at.naive_utc())
        .bind(record.expires_at.naive_utc())
        .bind(as_i32(record.attempts_used))
        .bind(as_i32(record.max_attempts))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "link code collision"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_link_code(&self, code_hash: &str) -> StoreResult<Option<LinkCodeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {LINK_CODE_COLUMNS} FROM link_codes WHERE code_hash = $1"
        ))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(link_code_from_row).transpose()
    }

    async fn consume_link_code_attempt(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<AttemptOutcome> {
        // Increment only while unexpired and under budget, in one statement
        let accepted = sqlx::query(&format!(
            "UPDATE link_codes SET attempts_used = attempts_used + 1
             WHERE code_hash = $1 AND expires_at > $2 AND attempts_used < max_attempts
             RETURNING {LINK_CODE_COLUMNS}"
        ))
        .bind(code_hash)
        .bind(now.naive_utc())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = accepted {
            return Ok(AttemptOutcome::Accepted(link_code_from_row(&row)?));
        }

        let Some(record) = self.find_link_code(code_hash).await? else {
            return Ok(AttemptOutcome::Unknown);
        };

        if record.is_expired(now) {
            self.delete_link_code(code_hash).await?;
            Ok(AttemptOutcome::Expired)
        } else {
            Ok(AttemptOutcome::Exhausted)
        }
    }

    async fn delete_link_code(&self, code_hash: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM link_codes WHERE code_hash = $1")
            .bind(code_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_merge(&self, plan: &MergePlan) -> StoreResult<MergeCommit> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-delete: only one concurrent confirm can remove the row
        let deleted = sqlx::query(
            "DELETE FROM link_codes WHERE code_hash = $1 AND source_account_id = $2
             RETURNING code_hash",
        )
        .bind(&plan.code_hash)
        .bind(plan.source_account_id)
        .fetch_optional(&mut *tx)
        .await?;
        if deleted.is_none() {
            return Ok(MergeCommit::CodeConsumed);
        }

        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id IN ($1, $2) ORDER BY id FOR UPDATE"
        ))
        .bind(plan.source_account_id)
        .bind(plan.target_account_id)
        .fetch_all(&mut *tx)
        .await?;
        let accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        let Some(source) = accounts
            .iter()
            .find(|a| a.id == plan.source_account_id && a.is_active)
        else {
            return Ok(MergeCommit::SourceInactive);
        };
        let Some(target) = accounts
            .iter()
            .find(|a| a.id == plan.target_account_id && a.is_active)
        else {
            return Ok(MergeCommit::TargetInactive);
        };

        // Assets may have changed since the plan was evaluated
        if source.assets.has_data() && target.assets.has_data() {
            return Ok(MergeCommit::BothHaveData);
        }
        let carry_assets = plan.carry_assets && source.assets.has_data();

        let rows = sqlx::query(
            "SELECT account_id, provider, provider_user_id, linked_at
             FROM identities WHERE account_id IN ($1, $2) FOR UPDATE",
        )
        .bind(plan.source_account_id)
        .bind(plan.target_account_id)
        .fetch_all(&mut *tx)
        .await?;
        let identities = rows
            .iter()
            .map(identity_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        let (source_identities, target_identities): (Vec<_>, Vec<_>) = identities
            .into_iter()
            .partition(|i| i.account_id == plan.source_account_id);

        let mut replaced_telegram = false;
        for identity in &source_identities {
            if let Some(existing) = target_identities
                .iter()
                .find(|t| t.provider == identity.provider)
            {
                let same = existing.provider_user_id == identity.provider_user_id;
                if identity.provider.is_telegram() && plan.replace_target_telegram && !same {
                    replaced_telegram = true;
                } else {
                    return Ok(MergeCommit::IdentityCollision(identity.provider));
                }
            }
        }

        if replaced_telegram {
            sqlx::query("DELETE FROM identities WHERE account_id = $1 AND provider = 'telegram'")
                .bind(plan.target_account_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE identities SET account_id = $1 WHERE account_id = $2")
            .bind(plan.target_account_id)
            .bind(plan.source_account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO cooldowns (account_id, kind, until)
             SELECT $1, kind, until FROM cooldowns WHERE account_id = $2
             ON CONFLICT (account_id, kind)
             DO UPDATE SET until = GREATEST(cooldowns.until, EXCLUDED.until)",
        )
        .bind(plan.target_account_id)
        .bind(plan.source_account_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cooldowns WHERE account_id = $1")
            .bind(plan.source_account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM unlink_requests WHERE account_id = $1")
            .bind(plan.source_account_id)
            .execute(&mut *tx)
            .await?;

        if carry_assets {
            sqlx::query(
                "UPDATE accounts
                 SET active_subscription = $1, referral_count = $2, balance_minor = $3
                 WHERE id = $4",
            )
            .bind(source.assets.active_subscription)
            .bind(as_i32(source.assets.referral_count))
            .bind(source.assets.balance_minor)
            .bind(plan.target_account_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE accounts
                 SET active_subscription = FALSE, referral_count = 0, balance_minor = 0
                 WHERE id = $1",
            )
            .bind(plan.source_account_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE accounts SET is_active = FALSE WHERE id = $1")
            .bind(plan.source_account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(MergeCommit::Committed(MergeSummary {
            moved_providers: source_identities.iter().map(|i| i.provider).collect(),
            replaced_telegram,
            assets_carried: carry_assets,
        }))
    }
}

#[async_trait]
impl UnlinkRepository for PgStore {
    async fn find_unlink_request(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> StoreResult<Option<UnlinkRequestRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {UNLINK_COLUMNS} FROM unlink_requests WHERE account_id = $1 AND provider = $2"
        ))
        .bind(account_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(unlink_from_row).transpose()
    }

    async fn find_unlink_request_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<UnlinkRequestRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {UNLINK_COLUMNS} FROM unlink_requests WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(unlink_from_row).transpose()
    }

    async fn insert_unlink_request(
        &self,
        record: &UnlinkRequestRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM unlink_requests
             WHERE account_id = $1 AND provider = $2 AND expires_at <= $3",
        )
        .bind(record.account_id)
        .bind(record.provider.as_str())
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO unlink_requests
                (id, token_hash, account_id, provider, otp_hash, created_at, expires_at,
                 attempts_remaining, resend_available_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.token_hash)
        .bind(record.account_id)
        .bind(record.provider.as_str())
        .bind(&record.otp_hash)
        .bind(record.created_at.naive_utc())
        .bind(record.expires_at.naive_utc())
        .bind(as_i32(record.attempts_remaining))
        .bind(record.resend_available_at.naive_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn reissue_unlink_otp(
        &self,
        request_id: Uuid,
        token_hash: &str,
        otp_hash: &str,
        resend_available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE unlink_requests
             SET token_hash = $1, otp_hash = $2, resend_available_at = $3
             WHERE id = $4 AND expires_at > $5 AND resend_available_at <= $5",
        )
        .bind(token_hash)
        .bind(otp_hash)
        .bind(resend_available_at.naive_utc())
        .bind(request_id)
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failed_otp(&self, request_id: Uuid) -> StoreResult<Option<u32>> {
        let row = sqlx::query(
            "UPDATE unlink_requests SET attempts_remaining = attempts_remaining - 1
             WHERE id = $1 AND attempts_remaining > 0
             RETURNING attempts_remaining",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|r| count(r, "attempts_remaining"))
            .transpose()
    }

    async fn delete_unlink_request(&self, request_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM unlink_requests WHERE id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_unlink(&self, commit: &UnlinkCommit) -> StoreResult<UnlinkCommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM unlink_requests WHERE id = $1 RETURNING attempts_remaining",
        )
        .bind(commit.request_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(deleted) = deleted else {
            return Ok(UnlinkCommitOutcome::RequestGone);
        };
        // Concurrent wrong guesses may have spent the budget after the read
        if count(&deleted, "attempts_remaining")? == 0 {
            tx.commit().await?;
            return Ok(UnlinkCommitOutcome::AttemptsExhausted);
        }

        let rows = sqlx::query("SELECT provider FROM identities WHERE account_id = $1 FOR UPDATE")
            .bind(commit.account_id)
            .fetch_all(&mut *tx)
            .await?;
        let providers = rows
            .iter()
            .map(|r| provider(r, "provider"))
            .collect::<StoreResult<Vec<_>>>()?;

        let outcome = if !providers.contains(&commit.provider) {
            UnlinkCommitOutcome::IdentityGone
        } else if providers.len() <= 1 {
            UnlinkCommitOutcome::LastIdentity
        } else {
            sqlx::query("DELETE FROM identities WHERE account_id = $1 AND provider = $2")
                .bind(commit.account_id)
                .bind(commit.provider.as_str())
                .execute(&mut *tx)
                .await?;

            let mut cooldowns = vec![(CooldownKind::Unlink, commit.unlink_cooldown_until)];
            if let Some(until) = commit.telegram_relink_until {
                cooldowns.push((CooldownKind::TelegramRelink, until));
            }
            for (kind, until) in cooldowns {
                sqlx::query(
                    "INSERT INTO cooldowns (account_id, kind, until) VALUES ($1, $2, $3)
                     ON CONFLICT (account_id, kind) DO UPDATE SET until = EXCLUDED.until",
                )
                .bind(commit.account_id)
                .bind(kind.to_string())
                .bind(until.naive_utc())
                .execute(&mut *tx)
                .await?;
            }
            UnlinkCommitOutcome::Completed
        };

        // The request is spent whatever the outcome
        tx.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl MergeTicketRepository for PgStore {
    async fn create_ticket_consuming_code(
        &self,
        code_hash: &str,
        ticket: &MergeTicket,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM link_codes WHERE code_hash = $1 RETURNING code_hash")
            .bind(code_hash)
            .fetch_optional(&mut *tx)
            .await?;
        if deleted.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO merge_tickets
                (id, requester_account_id, source_account_id, comment, decision,
                 resolution_comment, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(ticket.id)
        .bind(ticket.requester_account_id)
        .bind(ticket.source_account_id)
        .bind(&ticket.comment)
        .bind(ticket.decision.to_string())
        .bind(&ticket.resolution_comment)
        .bind(ticket.created_at.naive_utc())
        .bind(ticket.updated_at.naive_utc())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "requester already has a pending ticket"))?;

        tx.commit().await?;
        Ok(true)
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<MergeTicket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM merge_tickets WHERE id = $1"
        ))
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn latest_ticket_for_requester(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM merge_tickets
             WHERE requester_account_id = $1
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn latest_ticket_for_pair(
        &self,
        requester_account_id: AccountId,
        source_account_id: AccountId,
    ) -> StoreResult<Option<MergeTicket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM merge_tickets
             WHERE requester_account_id = $1 AND source_account_id = $2
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(requester_account_id)
        .bind(source_account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn decide_ticket(
        &self,
        ticket_id: Uuid,
        decision: MergeDecision,
        resolution_comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MergeTicket>> {
        let row = sqlx::query(&format!(
            "UPDATE merge_tickets
             SET decision = $1, resolution_comment = $2, updated_at = $3
             WHERE id = $4 AND decision = 'pending'
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(decision.to_string())
        .bind(resolution_comment)
        .bind(now.naive_utc())
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ticket_from_row).transpose()
    }
}

#[async_trait]
impl RateLimitRepository for PgStore {
    async fn load_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> StoreResult<Option<RateLimitAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {RATE_LIMIT_COLUMNS} FROM rate_limit_attempts
             WHERE endpoint = $1 AND identifier = $2"
        ))
        .bind(endpoint)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn record_attempt(
        &self,
        endpoint: &str,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitResult> {
        let mut tx = self.pool.begin().await?;

        // Seed the row so there is always something to lock
        sqlx::query(
            "INSERT INTO rate_limit_attempts (endpoint, identifier, attempts, window_start)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (endpoint, identifier) DO NOTHING",
        )
        .bind(endpoint)
        .bind(identifier)
        .bind(now.naive_utc())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {RATE_LIMIT_COLUMNS} FROM rate_limit_attempts
             WHERE endpoint = $1 AND identifier = $2 FOR UPDATE"
        ))
        .bind(endpoint)
        .bind(identifier)
        .fetch_one(&mut *tx)
        .await?;
        let current = attempt_from_row(&row)?;

        let (next, result) = current.advance(config, now);
        if let Some(next) = next {
            sqlx::query(
                "UPDATE rate_limit_attempts
                 SET attempts = $3, window_start = $4, locked_until = $5,
                     consecutive_violations = $6
                 WHERE endpoint = $1 AND identifier = $2",
            )
            .bind(endpoint)
            .bind(identifier)
            .bind(as_i32(next.attempts))
            .bind(next.window_start.naive_utc())
            .bind(next.locked_until.map(|dt| dt.naive_utc()))
            .bind(as_i32(next.consecutive_violations))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result)
    }

    async fn delete_attempt(&self, endpoint: &str, identifier: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM rate_limit_attempts WHERE endpoint = $1 AND identifier = $2")
            .bind(endpoint)
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MaintenanceRepository for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let now = now.naive_utc();
        let mut removed = 0;

        removed += sqlx::query("DELETE FROM link_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM unlink_requests WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        // Idle rows go only after the retention period so backoff history survives
        let idle_before = now - Duration::seconds(RATE_LIMIT_RETENTION_SECS);
        removed += sqlx::query(
            "DELETE FROM rate_limit_attempts
             WHERE (locked_until IS NULL OR locked_until <= $1) AND window_start < $2",
        )
        .bind(now)
        .bind(idle_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseConfig};
    use std::sync::Arc;
    use tokio::task::JoinSet;

    async fn store() -> PgStore {
        let mut config = DatabaseConfig::development();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        let db = Database::connect(&config).await.expect("Failed to connect");
        db.migrate().await.expect("Migrations failed");
        db.into_store()
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_attempt_counter_is_bounded() {
        let store = store().await;
        let now = Utc::now();
        let suffix = Uuid::new_v4().to_string();
        let account = store
            .create_account(Provider::Telegram, &suffix, now)
            .await
            .unwrap();

        store
            .replace_link_code(&LinkCodeRecord {
                code_hash: suffix.clone(),
                source_account_id: account.id,
                source_identity_hints: IdentityHints::new(),
                created_at: now,
                expires_at: now + Duration::minutes(10),
                attempts_used: 0,
                max_attempts: 2,
            })
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(matches!(
                store.consume_link_code_attempt(&suffix, now).await.unwrap(),
                AttemptOutcome::Accepted(_)
            ));
        }
        assert_eq!(
            store.consume_link_code_attempt(&suffix, now).await.unwrap(),
            AttemptOutcome::Exhausted
        );
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_duplicate_identity_is_conflict() {
        let store = store().await;
        let now = Utc::now();
        let external = Uuid::new_v4().to_string();
        store
            .create_account(Provider::Google, &external, now)
            .await
            .unwrap();

        let err = store
            .create_account(Provider::Google, &external, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_concurrent_attempts_share_one_counter() {
        let store = Arc::new(store().await);
        let identifier = Uuid::new_v4().to_string();
        let config = RateLimitConfig {
            max_attempts: 5,
            window_secs: 600,
            lockout_secs: 900,
            exponential_backoff: true,
        };
        let now = Utc::now();

        let mut join_set = JoinSet::new();
        for _ in 0..30 {
            let store = store.clone();
            let identifier = identifier.clone();
            let config = config.clone();
            join_set.spawn(async move {
                store
                    .record_attempt("unlink_confirm", &identifier, &config, now)
                    .await
            });
        }

        let mut allowed = 0;
        while let Some(result) = join_set.join_next().await {
            if result.unwrap().unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_merge_rechecks_assets_under_lock() {
        let store = store().await;
        let now = Utc::now();
        let source = store
            .create_account(Provider::Telegram, &Uuid::new_v4().to_string(), now)
            .await
            .unwrap();
        let target = store
            .create_account(Provider::Google, &Uuid::new_v4().to_string(), now)
            .await
            .unwrap();
        store
            .set_assets(
                source.id,
                AccountAssets {
                    active_subscription: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let code_hash = Uuid::new_v4().to_string();
        store
            .replace_link_code(&LinkCodeRecord {
                code_hash: code_hash.clone(),
                source_account_id: source.id,
                source_identity_hints: IdentityHints::new(),
                created_at: now,
                expires_at: now + Duration::minutes(10),
                attempts_used: 1,
                max_attempts: 5,
            })
            .await
            .unwrap();

        // Target gains a balance after the plan was evaluated
        store
            .set_assets(
                target.id,
                AccountAssets {
                    balance_minor: 5000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = store
            .commit_merge(&MergePlan {
                code_hash: code_hash.clone(),
                source_account_id: source.id,
                target_account_id: target.id,
                replace_target_telegram: false,
                carry_assets: true,
                now,
            })
            .await
            .unwrap();
        assert_eq!(outcome, MergeCommit::BothHaveData);

        let target = store.find_account(target.id).await.unwrap().unwrap();
        assert_eq!(target.assets.balance_minor, 5000);
        assert!(store.find_link_code(&code_hash).await.unwrap().is_some());
    }
}
