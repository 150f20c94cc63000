//! Merge conflict evaluation.
//!
//! Decides whether two accounts can be merged automatically or need a human
//! to adjudicate.

pub mod resolver;

pub use resolver::{ConflictReason, ConflictResolver, Evaluation, MergeSide};
