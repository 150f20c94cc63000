//! Link code data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::auth::SessionTokens;
use crate::conflict::ConflictReason;
use crate::identity::{Account, AccountId, Provider};

/// Masked identity hints keyed by provider name
pub type IdentityHints = BTreeMap<String, String>;

/// Stored link code. Only the digest of the code is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCodeRecord {
    pub code_hash: String,
    pub source_account_id: AccountId,
    pub source_identity_hints: IdentityHints,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts_used: u32,
    pub max_attempts: u32,
}

impl LinkCodeRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }
}

/// Result of spending one attempt on a code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Attempt recorded; the record reflects the new count
    Accepted(LinkCodeRecord),
    /// Budget already spent, nothing recorded
    Exhausted,
    /// Code expired (and was removed)
    Expired,
    /// No such code
    Unknown,
}

/// Code handed back to its creator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedLinkCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of previewing a code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPreview {
    pub source_user_id: AccountId,
    pub source_identity_hints: IdentityHints,
    /// Clean merge that will replace the requester's Telegram identity
    pub replaces_telegram: bool,
    /// Automatic merge is unsafe; continue with a manual merge ticket
    pub manual_merge_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<ConflictReason>,
    pub attempts_remaining: u32,
}

/// Everything the store needs to commit a merge
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub code_hash: String,
    pub source_account_id: AccountId,
    pub target_account_id: AccountId,
    /// Drop the target's Telegram identity in favour of the source's
    pub replace_target_telegram: bool,
    /// Move the source's assets onto the target
    pub carry_assets: bool,
    pub now: DateTime<Utc>,
}

/// What a committed merge changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub moved_providers: Vec<Provider>,
    pub replaced_telegram: bool,
    pub assets_carried: bool,
}

/// Store-level result of a merge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeCommit {
    Committed(MergeSummary),
    /// Another request consumed the code first
    CodeConsumed,
    SourceInactive,
    TargetInactive,
    /// Both sides hold the same non-Telegram provider
    IdentityCollision(Provider),
    /// Both sides hold monetizable data once locked
    BothHaveData,
}

/// Result of confirming a link code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Account,
    pub merge: MergeSummary,
}

impl MergeResult {
    pub fn new(tokens: SessionTokens, user: Account, merge: MergeSummary) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user,
            merge,
        }
    }
}

/// Client-side projection of the link flow.
///
/// Never a security boundary: it can always be rebuilt from a fresh
/// preview or from the latest manual merge ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFlowState {
    Idle,
    Previewed,
    PreviewedWithWarning,
    ManualRequired,
    Confirmed,
    ManualSubmitted,
}

/// Inputs that move the client flow
#[derive(Debug, Clone, Copy)]
pub enum LinkFlowEvent<'a> {
    PreviewReceived(&'a LinkPreview),
    Confirmed,
    ManualSubmitted,
    CodeEdited,
}

impl LinkFlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkFlowState::Confirmed | LinkFlowState::ManualSubmitted)
    }

    /// Apply an event; invalid transitions leave the state unchanged
    pub fn apply(self, event: LinkFlowEvent<'_>) -> LinkFlowState {
        use LinkFlowState::*;

        if self.is_terminal() {
            return self;
        }

        match (self, event) {
            (_, LinkFlowEvent::CodeEdited) => Idle,
            (Idle, LinkFlowEvent::PreviewReceived(preview)) => {
                if preview.manual_merge_required {
                    ManualRequired
                } else if preview.replaces_telegram {
                    PreviewedWithWarning
                } else {
                    Previewed
                }
            }
            (Previewed | PreviewedWithWarning, LinkFlowEvent::Confirmed) => Confirmed,
            (ManualRequired, LinkFlowEvent::ManualSubmitted) => ManualSubmitted,
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(manual: bool, replaces_telegram: bool) -> LinkPreview {
        LinkPreview {
            source_user_id: 1,
            source_identity_hints: IdentityHints::new(),
            replaces_telegram,
            manual_merge_required: manual,
            conflict_reason: None,
            attempts_remaining: 4,
        }
    }

    #[test]
    fn test_clean_flow_reaches_confirmed() {
        let clean = preview(false, false);
        let state = LinkFlowState::Idle
            .apply(LinkFlowEvent::PreviewReceived(&clean))
            .apply(LinkFlowEvent::Confirmed);
        assert_eq!(state, LinkFlowState::Confirmed);
    }

    #[test]
    fn test_telegram_warning_flow() {
        let warned = preview(false, true);
        let state = LinkFlowState::Idle.apply(LinkFlowEvent::PreviewReceived(&warned));
        assert_eq!(state, LinkFlowState::PreviewedWithWarning);
        assert_eq!(
            state.apply(LinkFlowEvent::Confirmed),
            LinkFlowState::Confirmed
        );
    }

    #[test]
    fn test_manual_flow_cannot_confirm() {
        let conflicted = preview(true, false);
        let state = LinkFlowState::Idle.apply(LinkFlowEvent::PreviewReceived(&conflicted));
        assert_eq!(state, LinkFlowState::ManualRequired);
        assert_eq!(state.apply(LinkFlowEvent::Confirmed), LinkFlowState::ManualRequired);
        assert_eq!(
            state.apply(LinkFlowEvent::ManualSubmitted),
            LinkFlowState::ManualSubmitted
        );
    }

    #[test]
    fn test_edit_resets_unless_terminal() {
        let clean = preview(false, false);
        let previewed = LinkFlowState::Idle.apply(LinkFlowEvent::PreviewReceived(&clean));
        assert_eq!(previewed.apply(LinkFlowEvent::CodeEdited), LinkFlowState::Idle);
        assert_eq!(
            LinkFlowState::Confirmed.apply(LinkFlowEvent::CodeEdited),
            LinkFlowState::Confirmed
        );
    }

    #[test]
    fn test_record_budget_helpers() {
        let now = Utc::now();
        let record = LinkCodeRecord {
            code_hash: "h".to_string(),
            source_account_id: 1,
            source_identity_hints: IdentityHints::new(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            attempts_used: 5,
            max_attempts: 5,
        };
        assert!(record.is_exhausted());
        assert_eq!(record.attempts_remaining(), 0);
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + chrono::Duration::minutes(10)));
    }
}
