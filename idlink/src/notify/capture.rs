//! Recording collaborators for tests and local tooling.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{NotifyError, OtpSender, SupportDesk};
use crate::identity::{AccountId, Provider};
use crate::merge_ticket::MergeTicket;

/// Keeps the last OTP sent per (account, provider); can be told to fail
#[derive(Debug, Default)]
pub struct CapturingOtpSender {
    sent: Mutex<HashMap<(AccountId, Provider), Vec<String>>>,
    failing: AtomicBool,
}

impl CapturingOtpSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Most recent OTP generated for the pair, delivered or not
    pub fn last_otp(&self, account_id: AccountId, provider: Provider) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(account_id, provider))
            .and_then(|codes| codes.last().cloned())
    }

    /// Number of OTPs generated for the pair
    pub fn sent_count(&self, account_id: AccountId, provider: Provider) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(account_id, provider))
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl OtpSender for CapturingOtpSender {
    async fn send_unlink_otp(
        &self,
        account_id: AccountId,
        provider: Provider,
        otp: &str,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((account_id, provider))
            .or_default()
            .push(otp.to_string());

        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("channel unavailable".to_string()));
        }
        Ok(())
    }
}

/// Collects every ticket handed to the desk
#[derive(Debug, Default)]
pub struct CapturingSupportDesk {
    tickets: Mutex<Vec<MergeTicket>>,
}

impl CapturingSupportDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickets(&self) -> Vec<MergeTicket> {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SupportDesk for CapturingSupportDesk {
    async fn ticket_created(&self, ticket: &MergeTicket) -> Result<(), NotifyError> {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ticket.clone());
        Ok(())
    }
}
