//! # idlink
//!
//! Multi-provider identity linking and account merging.
//!
//! An account can hold at most one identity per provider (Telegram, email,
//! Google, Yandex, VK, Discord). Two accounts owned by the same person are
//! merged through a short-lived link code; when the merge would lose data it
//! is routed to a human through a manual merge ticket. Identities are
//! unlinked through a two-step OTP flow guarded by attempt budgets and
//! durable cooldowns.
//!
//! ## Core Modules
//!
//! - [`link`]: Link code creation, preview and confirmation
//! - [`conflict`]: Decides whether a merge can run unattended
//! - [`unlink`]: OTP-confirmed identity unlinking
//! - [`merge_ticket`]: Manual merge tickets
//! - [`identity`]: Accounts, identities, masking and unlink eligibility
//! - [`store`]: Storage traits with in-memory and PostgreSQL backends
//!
//! ## Example
//!
//! ```
//! use idlink::link::normalize_code;
//!
//! assert_eq!(normalize_code(" abc-123 ").as_deref(), Some("ABC123"));
//! ```

/// Session token issuance.
pub mod auth;

/// Wall-clock abstraction.
pub mod clock;

/// Linking policy.
pub mod config;

pub mod conflict;

/// Database connection management.
pub mod db;

pub mod errors;
pub mod identity;
pub mod link;
pub mod merge_ticket;

/// OTP delivery and support desk collaborators.
pub mod notify;

/// Durable rate limiting.
pub mod security;

pub mod store;
pub mod unlink;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::LinkPolicy;
pub use errors::{ErrorCode, ErrorKind};
pub use identity::{AccountId, Provider};
pub use store::{IdentityStore, InMemoryStore, PgStore};
