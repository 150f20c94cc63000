//! Log-based collaborators for development

use async_trait::async_trait;

use super::{NotifyError, OtpSender, SupportDesk};
use crate::identity::{AccountId, Provider};
use crate::merge_ticket::MergeTicket;

/// OTP sender that writes codes to the log (for development)
#[derive(Debug, Default)]
pub struct LogOtpSender;

impl LogOtpSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send_unlink_otp(
        &self,
        account_id: AccountId,
        provider: Provider,
        otp: &str,
    ) -> Result<(), NotifyError> {
        log::info!("Unlink OTP for account {account_id} via {provider}: {otp}");
        Ok(())
    }
}

/// Support desk that only logs new tickets
#[derive(Debug, Default)]
pub struct LogSupportDesk;

impl LogSupportDesk {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SupportDesk for LogSupportDesk {
    async fn ticket_created(&self, ticket: &MergeTicket) -> Result<(), NotifyError> {
        log::info!(
            "Manual merge ticket {} opened: account {} wants account {}",
            ticket.id,
            ticket.requester_account_id,
            ticket.source_account_id
        );
        Ok(())
    }
}
