//! Accounts and the external identities attached to them.
//!
//! Provides the identity listing with per-identity unlink eligibility, the
//! Telegram attach rules and provider sign-in.

pub mod errors;
pub mod manager;
pub mod masking;
pub mod models;
pub mod status;

pub use errors::{IdentityError, IdentityResult};
pub use manager::IdentityManager;
pub use masking::mask_provider_user_id;
pub use models::{
    Account, AccountAssets, AccountId, Block, BlockedReason, CooldownKind, IdentityStatus,
    IdentityView, LinkedIdentities, LinkedIdentity, PermanentBlock, Provider, SignInResult,
    TelegramRelinkView, UnknownProvider,
};
pub use status::{UnlinkContext, identity_view, telegram_relink_view, unlink_status};
