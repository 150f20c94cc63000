//! Out-of-band collaborators: OTP delivery and the support desk.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{AccountId, Provider};
use crate::merge_ticket::MergeTicket;

pub mod capture;
pub mod console;

pub use capture::{CapturingOtpSender, CapturingSupportDesk};
pub use console::{LogOtpSender, LogSupportDesk};

/// Delivery failures
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// The channel refused or dropped the message
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Delivers unlink OTPs through the provider being unlinked
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send_unlink_otp(
        &self,
        account_id: AccountId,
        provider: Provider,
        otp: &str,
    ) -> Result<(), NotifyError>;
}

/// Receives manual merge tickets for human adjudication
#[async_trait]
pub trait SupportDesk: Send + Sync {
    async fn ticket_created(&self, ticket: &MergeTicket) -> Result<(), NotifyError>;
}
