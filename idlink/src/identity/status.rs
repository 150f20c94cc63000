//! Unlink eligibility and Telegram relink rules.

use chrono::{DateTime, Utc};

use super::models::{
    Account, Block, IdentityStatus, IdentityView, LinkedIdentity, PermanentBlock, Provider,
    TelegramRelinkView,
};
use super::masking::mask_provider_user_id;
use crate::clock::seconds_until;

/// Everything needed to decide whether one provider may be unlinked
#[derive(Debug, Clone, Copy)]
pub struct UnlinkContext<'a> {
    pub account: &'a Account,
    pub identities: &'a [LinkedIdentity],
    /// End of the account-level unlink cooldown, if one was ever recorded
    pub unlink_cooldown_until: Option<DateTime<Utc>>,
    pub telegram_required: bool,
    pub now: DateTime<Utc>,
}

/// Evaluate unlink eligibility for `provider`.
///
/// Reasons are checked in a fixed order: not linked, last identity,
/// structurally unsupported (Telegram required, current auth provider),
/// then the cooldown.
pub fn unlink_status(provider: Provider, ctx: &UnlinkContext<'_>) -> IdentityStatus {
    if !ctx.identities.iter().any(|i| i.provider == provider) {
        return IdentityStatus::Blocked(Block::Permanent(PermanentBlock::IdentityNotLinked));
    }
    if ctx.identities.len() <= 1 {
        return IdentityStatus::Blocked(Block::Permanent(PermanentBlock::LastIdentity));
    }
    if provider.is_telegram() && ctx.telegram_required {
        return IdentityStatus::Blocked(Block::Permanent(PermanentBlock::TelegramRequired));
    }
    if ctx.account.primary_auth == provider {
        return IdentityStatus::Blocked(Block::Permanent(PermanentBlock::CurrentAuthProvider));
    }
    if let Some(until) = ctx.unlink_cooldown_until
        && until > ctx.now
    {
        return IdentityStatus::Blocked(Block::Cooldown { until });
    }
    IdentityStatus::Unblocked
}

/// Client view of one identity
pub fn identity_view(identity: &LinkedIdentity, ctx: &UnlinkContext<'_>) -> IdentityView {
    let status = unlink_status(identity.provider, ctx);
    let (blocked_reason, blocked_until) = match status {
        IdentityStatus::Unblocked => (None, None),
        IdentityStatus::Blocked(block) => (Some(block.reason()), block.until()),
    };

    IdentityView {
        provider: identity.provider,
        provider_user_id_masked: mask_provider_user_id(
            identity.provider,
            &identity.provider_user_id,
        ),
        linked_at: identity.linked_at,
        can_unlink: status.can_unlink(),
        blocked_reason,
        blocked_until,
        retry_after_seconds: blocked_until.map(|until| seconds_until(ctx.now, until)),
    }
}

/// Whether a new Telegram identity may be attached
pub fn telegram_relink_view(
    identities: &[LinkedIdentity],
    relink_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TelegramRelinkView {
    let cooldown_until = relink_until.filter(|until| *until > now);

    TelegramRelinkView {
        requires_unlink_first: identities.iter().any(|i| i.provider.is_telegram()),
        retry_after_seconds: cooldown_until.map(|until| seconds_until(now, until)),
        cooldown_until,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AccountAssets, BlockedReason};
    use chrono::Duration;

    fn account(primary: Provider) -> Account {
        Account {
            id: 1,
            is_active: true,
            primary_auth: primary,
            assets: AccountAssets::default(),
            created_at: Utc::now(),
        }
    }

    fn identity(provider: Provider, external: &str) -> LinkedIdentity {
        LinkedIdentity {
            account_id: 1,
            provider,
            provider_user_id: external.to_string(),
            linked_at: Utc::now(),
        }
    }

    fn ctx<'a>(
        account: &'a Account,
        identities: &'a [LinkedIdentity],
        cooldown: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> UnlinkContext<'a> {
        UnlinkContext {
            account,
            identities,
            unlink_cooldown_until: cooldown,
            telegram_required: false,
            now,
        }
    }

    #[test]
    fn test_sole_identity_is_last_identity() {
        let now = Utc::now();
        for provider in Provider::ALL {
            let acc = account(provider);
            let ids = [identity(provider, "external-1")];
            let mut context = ctx(&acc, &ids, None, now);
            context.telegram_required = true;
            assert_eq!(
                unlink_status(provider, &context),
                IdentityStatus::Blocked(Block::Permanent(PermanentBlock::LastIdentity))
            );
        }
    }

    #[test]
    fn test_check_order() {
        let now = Utc::now();
        let acc = account(Provider::Email);
        let ids = [
            identity(Provider::Email, "a@example.com"),
            identity(Provider::Telegram, "1234"),
        ];

        let status = unlink_status(Provider::Vk, &ctx(&acc, &ids, None, now));
        assert_eq!(
            status,
            IdentityStatus::Blocked(Block::Permanent(PermanentBlock::IdentityNotLinked))
        );

        let mut required = ctx(&acc, &ids, None, now);
        required.telegram_required = true;
        assert_eq!(
            unlink_status(Provider::Telegram, &required),
            IdentityStatus::Blocked(Block::Permanent(PermanentBlock::TelegramRequired))
        );

        let until = now + Duration::hours(1);
        assert_eq!(
            unlink_status(Provider::Telegram, &ctx(&acc, &ids, Some(until), now)),
            IdentityStatus::Blocked(Block::Cooldown { until })
        );
        assert!(
            unlink_status(Provider::Telegram, &ctx(&acc, &ids, Some(now), now)).can_unlink()
        );
    }

    #[test]
    fn test_view_carries_timing_only_for_cooldown() {
        let now = Utc::now();
        let acc = account(Provider::Email);
        let ids = [
            identity(Provider::Email, "anna@example.com"),
            identity(Provider::Telegram, "987654"),
        ];
        let until = now + Duration::seconds(90);
        let context = ctx(&acc, &ids, Some(until), now);

        let email = identity_view(&ids[0], &context);
        assert_eq!(email.blocked_reason, Some(BlockedReason::CurrentAuthProvider));
        assert_eq!(email.blocked_until, None);
        assert_eq!(email.provider_user_id_masked, "a...@example.com");

        let telegram = identity_view(&ids[1], &context);
        assert_eq!(telegram.blocked_reason, Some(BlockedReason::CooldownActive));
        assert_eq!(telegram.blocked_until, Some(until));
        assert_eq!(telegram.retry_after_seconds, Some(90));
        assert_eq!(telegram.provider_user_id_masked, "...654");
    }

    #[test]
    fn test_telegram_relink_view() {
        let now = Utc::now();
        let ids = [identity(Provider::Telegram, "1234")];

        let view = telegram_relink_view(&ids, None, now);
        assert!(view.requires_unlink_first);
        assert!(view.retry_after_seconds.is_none());

        let until = now + Duration::days(30);
        let view = telegram_relink_view(&[], Some(until), now);
        assert!(!view.requires_unlink_first);
        assert_eq!(view.cooldown_until, Some(until));
        assert_eq!(view.retry_after_seconds, Some(30 * 86_400));

        let view = telegram_relink_view(&[], Some(now - Duration::seconds(1)), now);
        assert!(view.cooldown_until.is_none());
    }
}
