//! Identity manager implementation.

use super::{
    errors::{IdentityError, IdentityResult},
    models::{
        Account, AccountAssets, AccountId, CooldownKind, LinkedIdentities, LinkedIdentity, Provider,
        SignInResult,
    },
    status::{UnlinkContext, identity_view, telegram_relink_view},
};
use std::sync::Arc;

use crate::auth::SessionIssuer;
use crate::clock::{SharedClock, seconds_until};
use crate::config::LinkPolicy;
use crate::store::{IdentityStore, StoreError};

/// Longest external id accepted from a provider
const MAX_PROVIDER_USER_ID_LEN: usize = 255;

/// Lists, attaches and signs in with external identities
pub struct IdentityManager {
    store: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionIssuer>,
    clock: SharedClock,
    policy: LinkPolicy,
}

impl IdentityManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionIssuer>,
        clock: SharedClock,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            policy,
        }
    }

    /// Every identity of the account with its unlink eligibility, plus the
    /// Telegram relink status
    pub async fn list_linked_identities(
        &self,
        account_id: AccountId,
    ) -> IdentityResult<LinkedIdentities> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(IdentityError::AccountNotFound(account_id))?;
        let identities = self.store.list_identities(account_id).await?;
        let unlink_cooldown_until = self
            .store
            .get_cooldown(account_id, CooldownKind::Unlink)
            .await?;
        let relink_until = self
            .store
            .get_cooldown(account_id, CooldownKind::TelegramRelink)
            .await?;
        let now = self.clock.now();

        let ctx = UnlinkContext {
            account: &account,
            identities: &identities,
            unlink_cooldown_until,
            telegram_required: self.policy.telegram_required,
            now,
        };

        Ok(LinkedIdentities {
            identities: identities.iter().map(|i| identity_view(i, &ctx)).collect(),
            telegram_relink: telegram_relink_view(&identities, relink_until, now),
        })
    }

    /// Attach an external identity to an existing account
    ///
    /// Attaching the identity the account already holds is a no-op.
    ///
    /// # Errors
    ///
    /// * `IdentityError::IdentityAlreadyLinked` - External id belongs to another account
    /// * `IdentityError::TelegramRequiresUnlinkFirst` - Account holds another Telegram identity
    /// * `IdentityError::TelegramRelinkCooldown` - Telegram was unlinked recently
    /// * `IdentityError::ProviderAlreadyLinked` - Account holds another identity of the provider
    pub async fn attach_identity(
        &self,
        account_id: AccountId,
        provider: Provider,
        provider_user_id: &str,
    ) -> IdentityResult<LinkedIdentity> {
        let provider_user_id = validate_provider_user_id(provider_user_id)?;

        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(IdentityError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(IdentityError::AccountInactive);
        }

        if let Some(existing) = self.store.find_identity(provider, provider_user_id).await? {
            return if existing.account_id == account_id {
                Ok(existing)
            } else {
                Err(IdentityError::IdentityAlreadyLinked(provider))
            };
        }

        let identities = self.store.list_identities(account_id).await?;
        if identities.iter().any(|i| i.provider == provider) {
            return Err(if provider.is_telegram() {
                IdentityError::TelegramRequiresUnlinkFirst
            } else {
                IdentityError::ProviderAlreadyLinked(provider)
            });
        }

        let now = self.clock.now();
        if provider.is_telegram()
            && let Some(until) = self
                .store
                .get_cooldown(account_id, CooldownKind::TelegramRelink)
                .await?
            && until > now
        {
            return Err(IdentityError::TelegramRelinkCooldown {
                retry_after_seconds: seconds_until(now, until),
                blocked_until: until,
            });
        }

        let identity = LinkedIdentity {
            account_id,
            provider,
            provider_user_id: provider_user_id.to_string(),
            linked_at: now,
        };

        match self.store.attach_identity(&identity).await {
            Ok(()) => {
                log::info!("Attached {provider} identity to account {account_id}");
                Ok(identity)
            }
            Err(StoreError::Conflict(detail)) => {
                log::debug!("Attach to account {account_id} lost a race: {detail}");
                Err(IdentityError::IdentityAlreadyLinked(provider))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sign in with an external identity, registering an account on first use
    ///
    /// The provider becomes the account's current auth method.
    pub async fn sign_in(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> IdentityResult<SignInResult> {
        let provider_user_id = validate_provider_user_id(provider_user_id)?;

        let (account, created) = match self.store.find_identity(provider, provider_user_id).await? {
            Some(identity) => (self.signed_in_account(identity.account_id, provider).await?, false),
            None => {
                match self
                    .store
                    .create_account(provider, provider_user_id, self.clock.now())
                    .await
                {
                    Ok(account) => {
                        log::info!("Registered account {} via {provider}", account.id);
                        (account, true)
                    }
                    Err(StoreError::Conflict(_)) => {
                        // Registered concurrently by another sign-in
                        let identity = self
                            .store
                            .find_identity(provider, provider_user_id)
                            .await?
                            .ok_or(IdentityError::IdentityAlreadyLinked(provider))?;
                        (
                            self.signed_in_account(identity.account_id, provider).await?,
                            false,
                        )
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let tokens = self.sessions.issue(account.id)?;

        Ok(SignInResult {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user: account,
            created,
        })
    }

    /// Replace the monetizable state of an account
    pub async fn set_assets(
        &self,
        account_id: AccountId,
        assets: AccountAssets,
    ) -> IdentityResult<()> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or(IdentityError::AccountNotFound(account_id))?;
        self.store.set_assets(account_id, assets).await?;
        Ok(())
    }

    async fn signed_in_account(
        &self,
        account_id: AccountId,
        provider: Provider,
    ) -> IdentityResult<Account> {
        let mut account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(IdentityError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(IdentityError::AccountInactive);
        }
        if account.primary_auth != provider {
            self.store.set_primary_auth(account_id, provider).await?;
            account.primary_auth = provider;
        }
        Ok(account)
    }
}

fn validate_provider_user_id(provider_user_id: &str) -> IdentityResult<&str> {
    let trimmed = provider_user_id.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_PROVIDER_USER_ID_LEN {
        return Err(IdentityError::InvalidProviderUserId);
    }
    Ok(trimmed)
}
