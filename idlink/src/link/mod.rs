//! Link codes: short-lived, single-use tokens that merge one account into
//! another.
//!
//! The source account creates a code and hands it to the requester, who
//! previews it and then confirms it (or, when a conflict is found, files a
//! manual merge ticket). Every preview and confirm spends one attempt from
//! the code's budget before anything else is checked.

pub mod code;
pub mod errors;
pub mod manager;
pub mod models;

pub use code::{CODE_ALPHABET, CodeSource, FixedCodes, RandomCodes, hash_code, normalize_code};
pub use errors::{LinkError, LinkResult};
pub use manager::LinkCodeManager;
pub use models::{
    AttemptOutcome, IdentityHints, IssuedLinkCode, LinkCodeRecord, LinkFlowEvent, LinkFlowState,
    LinkPreview, MergeCommit, MergePlan, MergeResult, MergeSummary,
};
