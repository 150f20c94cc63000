//! Integration tests for unlinking and the Telegram relink cooldown.

mod common;

use chrono::Duration;
use common::Harness;
use idlink::identity::IdentityError;
use idlink::unlink::UnlinkError;
use idlink::{Clock, ErrorCode, Provider};

#[tokio::test]
async fn test_last_identity_for_every_provider() {
    let h = Harness::new();
    for provider in Provider::ALL {
        let account = h.account(provider, &format!("sole-{provider}")).await;
        let err = h.unlinks.request_unlink(account, provider).await.unwrap_err();
        assert_eq!(err.code(), "last_identity", "provider {provider}");
    }
}

#[tokio::test]
async fn test_round_trip_removes_identity() {
    let h = Harness::new();
    let account = h.account(Provider::Email, "anna@example.com").await;
    h.identities
        .attach_identity(account, Provider::Discord, "discord-42")
        .await
        .unwrap();

    let issued = h
        .unlinks
        .request_unlink(account, Provider::Discord)
        .await
        .unwrap();
    let otp = h.otp_sender.last_otp(account, Provider::Discord).unwrap();
    let confirmed = h
        .unlinks
        .confirm_unlink(account, Provider::Discord, &issued.request_token, &otp)
        .await
        .unwrap();
    assert_eq!(confirmed.provider, Provider::Discord);

    let listed = h.identities.list_linked_identities(account).await.unwrap();
    assert!(listed.identities.iter().all(|v| v.provider != Provider::Discord));
}

#[tokio::test]
async fn test_wrong_otp_decrements_by_one() {
    let h = Harness::new();
    let account = h.account(Provider::Email, "anna@example.com").await;
    h.identities
        .attach_identity(account, Provider::Yandex, "ya-1")
        .await
        .unwrap();

    let issued = h
        .unlinks
        .request_unlink(account, Provider::Yandex)
        .await
        .unwrap();
    let otp = h.otp_sender.last_otp(account, Provider::Yandex).unwrap();
    let wrong = if otp == "123456" { "654321" } else { "123456" };

    let err = h
        .unlinks
        .confirm_unlink(account, Provider::Yandex, &issued.request_token, wrong)
        .await
        .unwrap_err();
    assert!(matches!(err, UnlinkError::OtpInvalid { attempts_remaining: 4 }));

    let listed = h.identities.list_linked_identities(account).await.unwrap();
    assert!(listed.identities.iter().any(|v| v.provider == Provider::Yandex));

    // The right OTP still works afterwards
    h.unlinks
        .confirm_unlink(account, Provider::Yandex, &issued.request_token, &otp)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_telegram_relink_countdown() {
    let h = Harness::new();
    let account = h.account(Provider::Email, "anna@example.com").await;
    h.identities
        .attach_identity(account, Provider::Telegram, "900100")
        .await
        .unwrap();

    let issued = h
        .unlinks
        .request_unlink(account, Provider::Telegram)
        .await
        .unwrap();
    let otp = h.otp_sender.last_otp(account, Provider::Telegram).unwrap();
    h.unlinks
        .confirm_unlink(account, Provider::Telegram, &issued.request_token, &otp)
        .await
        .unwrap();
    let unlinked_at = h.clock.now();

    let mut previous = i64::MAX;
    for _ in 0..4 {
        let err = h
            .identities
            .attach_identity(account, Provider::Telegram, "900200")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "telegram_relink_cooldown_active");
        assert_eq!(err.blocked_until(), Some(unlinked_at + Duration::days(30)));

        let retry = err.retry_after_seconds().unwrap();
        assert!(retry > 0);
        assert!(retry < previous);
        previous = retry;

        h.clock.advance(Duration::days(6));
    }

    let view = h.identities.list_linked_identities(account).await.unwrap();
    assert_eq!(view.telegram_relink.retry_after_seconds, Some(previous - 6 * 86_400));

    h.clock.advance(Duration::days(6));
    h.identities
        .attach_identity(account, Provider::Telegram, "900200")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_telegram_requires_unlink_first() {
    let h = Harness::new();
    let account = h.account(Provider::Telegram, "1").await;

    let err = h
        .identities
        .attach_identity(account, Provider::Telegram, "2")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TelegramRequiresUnlinkFirst));

    let view = h.identities.list_linked_identities(account).await.unwrap();
    assert!(view.telegram_relink.requires_unlink_first);
}

#[tokio::test]
async fn test_delivery_failure_keeps_resend_cooldown() {
    let h = Harness::new();
    let account = h.account(Provider::Email, "anna@example.com").await;
    h.identities
        .attach_identity(account, Provider::Vk, "vk-1")
        .await
        .unwrap();
    h.otp_sender.set_failing(true);

    let err = h
        .unlinks
        .request_unlink(account, Provider::Vk)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unlink_otp_delivery_failed");

    // Retrying immediately does not bypass the resend timer
    h.otp_sender.set_failing(false);
    let err = h
        .unlinks
        .request_unlink(account, Provider::Vk)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unlink_otp_resend_cooldown");
    assert_eq!(h.otp_sender.sent_count(account, Provider::Vk), 1);
}

#[tokio::test]
async fn test_confirm_rate_limit_spans_requests() {
    let h = Harness::new();
    let account = h.account(Provider::Email, "anna@example.com").await;
    h.identities
        .attach_identity(account, Provider::Vk, "vk-1")
        .await
        .unwrap();

    for _ in 0..10 {
        let err = h
            .unlinks
            .confirm_unlink(account, Provider::Vk, "no-such-token", "000000")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unlink_request_invalid");
    }

    let err = h
        .unlinks
        .confirm_unlink(account, Provider::Vk, "no-such-token", "000000")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unlink_otp_rate_limited");
    assert!(err.retry_after_seconds().unwrap() > 0);
}
