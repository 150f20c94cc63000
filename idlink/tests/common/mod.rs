//! Shared wiring for integration tests: every manager on one in-memory
//! store, a manual clock and recording collaborators.

#![allow(dead_code)]

use chrono::Utc;
use idlink::auth::JwtSessionIssuer;
use idlink::identity::{AccountAssets, IdentityManager, LinkedIdentity};
use idlink::link::{FixedCodes, LinkCodeManager};
use idlink::merge_ticket::MergeTicketManager;
use idlink::notify::{CapturingOtpSender, CapturingSupportDesk};
use idlink::security::RateLimiter;
use idlink::store::AccountRepository;
use idlink::unlink::{OtpHasher, UnlinkManager};
use idlink::{AccountId, InMemoryStore, LinkPolicy, ManualClock, Provider, SharedClock};
use std::sync::Arc;

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub codes: Arc<FixedCodes>,
    pub otp_sender: Arc<CapturingOtpSender>,
    pub support_desk: Arc<CapturingSupportDesk>,
    pub links: Arc<LinkCodeManager>,
    pub unlinks: UnlinkManager,
    pub tickets: MergeTicketManager,
    pub identities: IdentityManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(LinkPolicy::default())
    }

    pub fn with_policy(policy: LinkPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(Utc::now());
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let codes = Arc::new(FixedCodes::new(std::iter::empty::<&str>()));
        let otp_sender = Arc::new(CapturingOtpSender::new());
        let support_desk = Arc::new(CapturingSupportDesk::new());

        let sessions = Arc::new(JwtSessionIssuer::new(
            "integration_test_jwt_secret_0123456789".to_string(),
            shared_clock.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), shared_clock.clone()));

        let links = Arc::new(
            LinkCodeManager::new(
                store.clone(),
                sessions.clone(),
                rate_limiter.clone(),
                shared_clock.clone(),
                policy.clone(),
            )
            .with_code_source(codes.clone()),
        );
        let unlinks = UnlinkManager::new(
            store.clone(),
            otp_sender.clone(),
            OtpHasher::light("integration_test_pepper".to_string()),
            rate_limiter.clone(),
            shared_clock.clone(),
            policy.clone(),
        );
        let tickets = MergeTicketManager::new(
            store.clone(),
            support_desk.clone(),
            rate_limiter,
            shared_clock.clone(),
            policy.clone(),
        );
        let identities = IdentityManager::new(store.clone(), sessions, shared_clock, policy);

        Self {
            store,
            clock,
            codes,
            otp_sender,
            support_desk,
            links,
            unlinks,
            tickets,
            identities,
        }
    }

    /// Register an account whose first identity is `provider`
    pub async fn account(&self, provider: Provider, external: &str) -> AccountId {
        self.identities
            .sign_in(provider, external)
            .await
            .expect("sign in should register")
            .user
            .id
    }

    /// Register an account holding an active subscription
    pub async fn paid_account(&self, provider: Provider, external: &str) -> AccountId {
        let id = self.account(provider, external).await;
        self.identities
            .set_assets(
                id,
                AccountAssets {
                    active_subscription: true,
                    ..Default::default()
                },
            )
            .await
            .expect("assets should be stored");
        id
    }

    /// Issue `code` as the next link code of `account`
    pub async fn link_code(&self, account: AccountId, code: &str) {
        self.codes.push(code);
        let issued = self
            .links
            .create_link_code(account)
            .await
            .expect("link code should be issued");
        assert_eq!(issued.code, code);
    }

    pub async fn identities_of(&self, account: AccountId) -> Vec<LinkedIdentity> {
        self.store
            .list_identities(account)
            .await
            .expect("identities should load")
    }
}
