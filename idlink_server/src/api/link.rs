//! Link code API handlers.
//!
//! A signed-in user creates a code on one account and enters it on the
//! other. Preview and confirm spend one attempt of the code each; a
//! conflicting pair is previewed with `manual_merge_required` and continues
//! through a manual merge ticket.
//!
//! # Examples
//!
//! Create a code on the source account:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/account/link-code \
//!   -H "Authorization: Bearer $SOURCE_TOKEN"
//! ```
//!
//! Confirm it on the target account:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/account/link-code/confirm \
//!   -H "Authorization: Bearer $TARGET_TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"code": "ABC123"}'
//! ```

use axum::{
    Json,
    extract::{Extension, State},
};
use idlink::AccountId;
use idlink::link::{IssuedLinkCode, LinkError, LinkPreview, MergeResult};
use idlink::merge_ticket::SubmittedTicket;
use serde::Deserialize;

use super::request_id::RequestId;
use super::{ApiResult, AppState};
use crate::{logging, metrics};

#[derive(Debug, Deserialize)]
pub struct CodePayload {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualMergePayload {
    pub code: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Flag lookups that hit an attempt budget or the lookup limiter
fn log_link_abuse(err: &LinkError, account_id: AccountId, request_id: &RequestId) {
    let event = match err {
        LinkError::AttemptsExceeded => "link_code_attempts_exceeded",
        LinkError::RateLimited { .. } => "link_code_lookup_rate_limited",
        _ => return,
    };
    logging::log_security_event(
        event,
        Some(account_id),
        Some(request_id.as_str()),
        &err.to_string(),
    );
}

/// Create a link code for the caller, replacing any live one.
///
/// # Response
///
/// ```json
/// { "code": "K7QX2M", "expires_at": "2026-01-01T12:10:00Z" }
/// ```
pub async fn create_link_code(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
) -> ApiResult<Json<IssuedLinkCode>> {
    let issued = state.links.create_link_code(account_id).await?;
    metrics::link_codes_created_total();
    Ok(Json(issued))
}

/// Show who owns a code and whether it can be merged automatically.
///
/// # Errors
///
/// - `410 Gone` `link_code_invalid`: unknown, expired or consumed
/// - `429 Too Many Requests` `link_code_attempts_exceeded`
/// - `400 Bad Request` `link_code_same_account`
/// - `403 Forbidden` `link_code_source_inactive` / `link_code_target_inactive`
pub async fn preview_link_code(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
    request_id: RequestId,
    Json(payload): Json<CodePayload>,
) -> ApiResult<Json<LinkPreview>> {
    let preview = state
        .links
        .preview_link_code(&payload.code, account_id)
        .await
        .inspect_err(|e| log_link_abuse(e, account_id, &request_id))?;

    metrics::link_previews_total(preview.manual_merge_required);
    Ok(Json(preview))
}

/// Merge the code's account into the caller and return a fresh session.
///
/// Errors as preview, plus `409 Conflict` `manual_merge_required` when the
/// pair needs a human.
pub async fn confirm_link_code(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
    request_id: RequestId,
    Json(payload): Json<CodePayload>,
) -> ApiResult<Json<MergeResult>> {
    let result = state
        .links
        .confirm_link_code(&payload.code, account_id)
        .await
        .inspect_err(|e| log_link_abuse(e, account_id, &request_id))?;

    metrics::merges_total(result.merge.replaced_telegram);
    logging::log_audit_event(
        "account_merged",
        account_id,
        &format!(
            "Merged account into {} (moved: {:?}, telegram replaced: {})",
            result.user.id, result.merge.moved_providers, result.merge.replaced_telegram
        ),
    );
    Ok(Json(result))
}

/// Open a manual merge ticket for a conflicting pair.
///
/// The code is consumed; support decides the ticket out of band.
pub async fn submit_manual_merge(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
    Json(payload): Json<ManualMergePayload>,
) -> ApiResult<Json<SubmittedTicket>> {
    let submitted = state
        .tickets
        .submit(&payload.code, account_id, payload.comment.as_deref())
        .await?;

    metrics::manual_merge_tickets_total();
    logging::log_audit_event(
        "manual_merge_submitted",
        account_id,
        &format!("Opened manual merge ticket {}", submitted.ticket_id),
    );
    Ok(Json(submitted))
}
