//! Manual merge ticket data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::identity::AccountId;

/// Adjudication state of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDecision {
    Pending,
    Approve,
    Reject,
}

impl fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeDecision::Pending => write!(f, "pending"),
            MergeDecision::Approve => write!(f, "approve"),
            MergeDecision::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for MergeDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MergeDecision::Pending),
            "approve" => Ok(MergeDecision::Approve),
            "reject" => Ok(MergeDecision::Reject),
            other => Err(format!("unknown merge decision {other}")),
        }
    }
}

/// Human-reviewed merge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTicket {
    pub id: Uuid,
    pub requester_account_id: AccountId,
    pub source_account_id: AccountId,
    pub comment: Option<String>,
    pub decision: MergeDecision,
    pub resolution_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ticket as shown to the requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatus {
    pub ticket_id: Uuid,
    pub decision: MergeDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<MergeTicket> for TicketStatus {
    fn from(ticket: MergeTicket) -> Self {
        Self {
            ticket_id: ticket.id,
            decision: ticket.decision,
            resolution_comment: ticket.resolution_comment,
            updated_at: ticket.updated_at,
        }
    }
}

/// Response to a manual merge submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedTicket {
    pub ticket_id: Uuid,
}
