//! Manual merge tickets for account pairs that cannot merge automatically.
//!
//! A ticket consumes the link code and waits for an external adjudicator.
//! Decisions are recorded here but never trigger a merge on their own.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{MergeTicketError, MergeTicketResult};
pub use manager::MergeTicketManager;
pub use models::{MergeDecision, MergeTicket, SubmittedTicket, TicketStatus};
