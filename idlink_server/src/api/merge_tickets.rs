//! Manual merge status for the requester.

use axum::{
    Json,
    extract::{Extension, State},
};
use idlink::AccountId;
use idlink::merge_ticket::TicketStatus;

use super::{ApiResult, AppState};

/// Latest ticket the caller submitted, or `null` when there is none
pub async fn latest_manual_merge(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
) -> ApiResult<Json<Option<TicketStatus>>> {
    Ok(Json(state.tickets.get_latest(account_id).await?))
}
