//! Conflict resolver.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::identity::{Account, AccountId, LinkedIdentity, Provider};
use crate::store::{IdentityStore, StoreResult};

/// Why a merge needs human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both accounts hold monetizable state
    BothHaveData,
    /// Both accounts hold an identity of the same non-Telegram provider
    ProviderCollision,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::BothHaveData => "both_have_data",
            ConflictReason::ProviderCollision => "provider_collision",
        }
    }
}

/// Outcome of evaluating a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Clean {
        /// Target's Telegram identity will be replaced by the source's
        replaces_telegram: bool,
        /// Source assets move to the target
        carry_assets: bool,
    },
    Conflict(ConflictReason),
}

impl Evaluation {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Evaluation::Conflict(_))
    }
}

/// One side of a merge: the account and its identities
#[derive(Debug, Clone, Copy)]
pub struct MergeSide<'a> {
    pub account: &'a Account,
    pub identities: &'a [LinkedIdentity],
}

impl MergeSide<'_> {
    fn identity(&self, provider: Provider) -> Option<&LinkedIdentity> {
        self.identities.iter().find(|i| i.provider == provider)
    }
}

/// Evaluates whether a source account may be merged into a target
pub struct ConflictResolver {
    store: Arc<dyn IdentityStore>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Load both accounts and evaluate them; `None` when either is missing
    pub async fn evaluate(
        &self,
        source_id: AccountId,
        target_id: AccountId,
    ) -> StoreResult<Option<Evaluation>> {
        let (Some(source), Some(target)) = (
            self.store.find_account(source_id).await?,
            self.store.find_account(target_id).await?,
        ) else {
            return Ok(None);
        };

        let source_identities = self.store.list_identities(source_id).await?;
        let target_identities = self.store.list_identities(target_id).await?;

        Ok(Some(Self::decide(
            MergeSide {
                account: &source,
                identities: &source_identities,
            },
            MergeSide {
                account: &target,
                identities: &target_identities,
            },
        )))
    }

    /// Pure decision rule.
    ///
    /// 1. Both sides have data: conflict.
    /// 2. Both sides hold the same non-Telegram provider: conflict.
    /// 3. Otherwise clean, flagging a Telegram replacement when both hold
    ///    different Telegram identities.
    pub fn decide(source: MergeSide<'_>, target: MergeSide<'_>) -> Evaluation {
        let source_has_data = source.account.assets.has_data();
        let target_has_data = target.account.assets.has_data();

        if source_has_data && target_has_data {
            return Evaluation::Conflict(ConflictReason::BothHaveData);
        }

        let mut replaces_telegram = false;
        for identity in source.identities {
            let Some(existing) = target.identity(identity.provider) else {
                continue;
            };
            if existing.provider_user_id == identity.provider_user_id {
                continue;
            }
            if identity.provider.is_telegram() {
                replaces_telegram = true;
            } else {
                return Evaluation::Conflict(ConflictReason::ProviderCollision);
            }
        }

        Evaluation::Clean {
            replaces_telegram,
            carry_assets: source_has_data && !target_has_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccountAssets;
    use chrono::Utc;

    fn account(id: AccountId, subscribed: bool) -> Account {
        Account {
            id,
            is_active: true,
            primary_auth: Provider::Telegram,
            assets: AccountAssets {
                active_subscription: subscribed,
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    fn identity(account_id: AccountId, provider: Provider, external: &str) -> LinkedIdentity {
        LinkedIdentity {
            account_id,
            provider,
            provider_user_id: external.to_string(),
            linked_at: Utc::now(),
        }
    }

    fn decide(
        source: &Account,
        source_ids: &[LinkedIdentity],
        target: &Account,
        target_ids: &[LinkedIdentity],
    ) -> Evaluation {
        ConflictResolver::decide(
            MergeSide {
                account: source,
                identities: source_ids,
            },
            MergeSide {
                account: target,
                identities: target_ids,
            },
        )
    }

    #[test]
    fn test_both_have_data_is_conflict() {
        let a = account(1, true);
        let b = account(2, true);
        assert_eq!(
            decide(&a, &[], &b, &[]),
            Evaluation::Conflict(ConflictReason::BothHaveData)
        );
    }

    #[test]
    fn test_one_side_data_is_clean_and_carries() {
        let a = account(1, true);
        let b = account(2, false);
        assert_eq!(
            decide(&a, &[], &b, &[]),
            Evaluation::Clean {
                replaces_telegram: false,
                carry_assets: true
            }
        );
        assert_eq!(
            decide(&b, &[], &a, &[]),
            Evaluation::Clean {
                replaces_telegram: false,
                carry_assets: false
            }
        );
    }

    #[test]
    fn test_different_telegram_is_flagged_not_blocked() {
        let a = account(1, false);
        let b = account(2, false);
        let result = decide(
            &a,
            &[identity(1, Provider::Telegram, "111")],
            &b,
            &[identity(2, Provider::Telegram, "222")],
        );
        assert_eq!(
            result,
            Evaluation::Clean {
                replaces_telegram: true,
                carry_assets: false
            }
        );
    }

    #[test]
    fn test_same_oauth_provider_collides() {
        let a = account(1, false);
        let b = account(2, false);
        let result = decide(
            &a,
            &[identity(1, Provider::Google, "g1")],
            &b,
            &[identity(2, Provider::Google, "g2")],
        );
        assert_eq!(result, Evaluation::Conflict(ConflictReason::ProviderCollision));
    }

    #[test]
    fn test_data_conflict_takes_precedence() {
        let a = account(1, true);
        let b = account(2, true);
        let result = decide(
            &a,
            &[identity(1, Provider::Vk, "v1")],
            &b,
            &[identity(2, Provider::Vk, "v2")],
        );
        assert_eq!(result, Evaluation::Conflict(ConflictReason::BothHaveData));
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictReason::ProviderCollision).unwrap();
        assert_eq!(json, "\"provider_collision\"");
    }
}
