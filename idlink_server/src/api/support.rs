//! Support desk hook for manual merge decisions.
//!
//! Authenticated with the shared `x-support-secret` header rather than a
//! user session. The route answers `404` when no secret is configured.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use idlink::merge_ticket::{MergeDecision, TicketStatus};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::request_id::RequestId;
use super::{ApiError, ApiResult, AppState};
use crate::logging;

/// Header carrying the support desk secret
pub const SUPPORT_SECRET_HEADER: &str = "x-support-secret";

#[derive(Debug, Deserialize)]
pub struct DecisionPayload {
    pub decision: MergeDecision,
    #[serde(default)]
    pub resolution_comment: Option<String>,
}

fn secret_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Record `approve` or `reject` on a pending ticket.
///
/// Approval does not merge anything; the adjudicator performs the merge
/// out of band.
pub async fn record_decision(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    headers: HeaderMap,
    request_id: RequestId,
    Json(payload): Json<DecisionPayload>,
) -> ApiResult<Json<TicketStatus>> {
    let Some(expected) = state.support_secret.as_deref() else {
        return Err(ApiError::not_found());
    };

    let provided = headers
        .get(SUPPORT_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !secret_matches(expected, provided) {
        logging::log_security_event(
            "support_secret_rejected",
            None,
            Some(request_id.as_str()),
            &format!("Bad support secret for ticket {}", ticket_id),
        );
        return Err(ApiError::unauthorized("Invalid support secret"));
    }

    let status = state
        .tickets
        .record_decision(
            ticket_id,
            payload.decision,
            payload.resolution_comment.as_deref(),
        )
        .await?;

    tracing::info!(
        ticket_id = %ticket_id,
        decision = %status.decision,
        "Manual merge ticket decided"
    );
    Ok(Json(status))
}
