//! Two-step unlinking of an identity: request an OTP, then confirm it.
//!
//! Requests, attempt counters and cooldowns are durable so the abuse
//! protection survives restarts.

pub mod errors;
pub mod manager;
pub mod models;
pub mod otp;

pub use errors::{UnlinkError, UnlinkResult};
pub use manager::UnlinkManager;
pub use models::{
    IssuedUnlinkRequest, UnlinkCommit, UnlinkCommitOutcome, UnlinkConfirmed, UnlinkRequestRecord,
};
pub use otp::OtpHasher;
