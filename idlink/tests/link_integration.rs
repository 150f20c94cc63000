//! Integration tests for link codes and automatic merges.

mod common;

use common::Harness;
use idlink::ErrorCode;
use idlink::Provider;
use idlink::identity::BlockedReason;
use idlink::link::LinkError;
use idlink::store::AccountRepository;
use std::collections::HashSet;

#[tokio::test]
async fn test_clean_merge_scenario() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "100200300").await;
    let b = h.paid_account(Provider::Email, "b@example.com").await;
    h.link_code(a, "ABC123").await;

    let preview = h.links.preview_link_code("ABC123", b).await.unwrap();
    assert_eq!(preview.source_user_id, a);
    assert!(!preview.manual_merge_required);
    assert_eq!(preview.source_identity_hints["telegram"], "...300");

    let result = h.links.confirm_link_code("ABC123", b).await.unwrap();
    assert_eq!(result.user.id, b);
    assert!(result.user.assets.active_subscription);

    let source = h.store.find_account(a).await.unwrap().unwrap();
    assert!(!source.is_active);
    assert!(h.identities_of(a).await.is_empty());

    let providers: Vec<Provider> = h.identities_of(b).await.iter().map(|i| i.provider).collect();
    assert_eq!(providers, vec![Provider::Telegram, Provider::Email]);
}

#[tokio::test]
async fn test_second_confirm_is_invalid() {
    let h = Harness::new();
    let a = h.account(Provider::Google, "g-1").await;
    let b = h.account(Provider::Email, "b@example.com").await;
    h.link_code(a, "ONCE42").await;

    h.links.confirm_link_code("ONCE42", b).await.unwrap();
    let err = h.links.confirm_link_code("ONCE42", b).await.unwrap_err();
    assert_eq!(err.code(), "link_code_invalid");
}

#[tokio::test]
async fn test_attempt_budget_is_fixed() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "1").await;
    let b = h.account(Provider::Email, "b@example.com").await;
    h.link_code(a, "BUDGET5").await;

    for remaining in (0..5).rev() {
        let preview = h.links.preview_link_code("BUDGET5", b).await.unwrap();
        assert_eq!(preview.attempts_remaining, remaining);
    }

    // The sixth call fails even though the code is correct
    let err = h.links.confirm_link_code("BUDGET5", b).await.unwrap_err();
    assert!(matches!(err, LinkError::AttemptsExceeded));
    assert_eq!(err.code(), "link_code_attempts_exceeded");
}

#[tokio::test]
async fn test_failed_checks_still_spend_attempts() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "1").await;
    h.link_code(a, "SELF99").await;

    for _ in 0..5 {
        let err = h.links.preview_link_code("SELF99", a).await.unwrap_err();
        assert_eq!(err.code(), "link_code_same_account");
    }
    let err = h.links.preview_link_code("SELF99", a).await.unwrap_err();
    assert_eq!(err.code(), "link_code_attempts_exceeded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_merge_once() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "777").await;
    h.identities
        .attach_identity(a, Provider::Vk, "vk-777")
        .await
        .unwrap();
    let b = h.account(Provider::Email, "b@example.com").await;
    h.link_code(a, "RACE01").await;
    let rows_before = h.store.identity_count();

    let first = tokio::spawn({
        let links = h.links.clone();
        async move { links.confirm_link_code("RACE01", b).await }
    });
    let second = tokio::spawn({
        let links = h.links.clone();
        async move { links.confirm_link_code("RACE01", b).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.code(), "link_code_invalid");

    assert_eq!(h.store.identity_count(), rows_before);
    let identities = h.identities_of(b).await;
    let distinct: HashSet<_> = identities.iter().map(|i| i.provider).collect();
    assert_eq!(distinct.len(), identities.len());
    assert_eq!(identities.len(), 3);
}

#[tokio::test]
async fn test_merge_replaces_requester_telegram() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "111").await;
    let b = h.account(Provider::Telegram, "222").await;
    h.link_code(a, "TGSWAP").await;

    let preview = h.links.preview_link_code("TGSWAP", b).await.unwrap();
    assert!(preview.replaces_telegram);

    let result = h.links.confirm_link_code("TGSWAP", b).await.unwrap();
    assert!(result.merge.replaced_telegram);

    let identities = h.identities_of(b).await;
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].provider_user_id, "111");
    assert!(h.store.find_identity(Provider::Telegram, "222").await.unwrap().is_none());
}

#[tokio::test]
async fn test_provider_collision_requires_manual_merge() {
    let h = Harness::new();
    let a = h.account(Provider::Google, "g-a").await;
    let b = h.account(Provider::Google, "g-b").await;
    h.link_code(a, "GCOLL1").await;

    let preview = h.links.preview_link_code("GCOLL1", b).await.unwrap();
    assert!(preview.manual_merge_required);

    let err = h.links.confirm_link_code("GCOLL1", b).await.unwrap_err();
    assert_eq!(err.code(), "manual_merge_required");
    assert_eq!(err.reason(), Some("provider_collision"));
    assert!(h.store.find_account(a).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_merged_identities_keep_unlink_rules() {
    let h = Harness::new();
    let a = h.account(Provider::Telegram, "100").await;
    let b = h.account(Provider::Email, "b@example.com").await;
    h.link_code(a, "KEEP11").await;
    h.links.confirm_link_code("KEEP11", b).await.unwrap();

    let listed = h.identities.list_linked_identities(b).await.unwrap();
    let telegram = listed
        .identities
        .iter()
        .find(|v| v.provider == Provider::Telegram)
        .unwrap();
    assert!(telegram.can_unlink);
    let email = listed
        .identities
        .iter()
        .find(|v| v.provider == Provider::Email)
        .unwrap();
    assert_eq!(email.blocked_reason, Some(BlockedReason::CurrentAuthProvider));
}
