//! Linked identity listing.

use axum::{
    Json,
    extract::{Extension, State},
};
use idlink::AccountId;
use idlink::identity::LinkedIdentities;

use super::{ApiResult, AppState};

/// List the caller's identities with masked ids and unlink eligibility.
///
/// # Response
///
/// ```json
/// {
///   "identities": [
///     { "provider": "telegram", "provider_user_id_masked": "***6789",
///       "linked_at": "...", "can_unlink": false, "blocked_reason": "current_auth_provider" }
///   ],
///   "telegram_relink": { "requires_unlink_first": true }
/// }
/// ```
pub async fn list_identities(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
) -> ApiResult<Json<LinkedIdentities>> {
    Ok(Json(state.identities.list_linked_identities(account_id).await?))
}
