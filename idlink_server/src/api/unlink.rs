//! Two-step identity unlinking.
//!
//! `request` sends an OTP through the identity being removed and returns an
//! opaque request token; `confirm` presents both.

use axum::{
    Json,
    extract::{Extension, State},
};
use idlink::AccountId;
use idlink::unlink::{IssuedUnlinkRequest, UnlinkConfirmed, UnlinkError};
use serde::Deserialize;

use super::request_id::RequestId;
use super::{ApiResult, AppState, parse_provider};
use crate::{logging, metrics};

#[derive(Debug, Deserialize)]
pub struct UnlinkRequestPayload {
    pub provider: String,
}

#[derive(Debug, Deserialize)]
pub struct UnlinkConfirmPayload {
    pub provider: String,
    pub request_token: String,
    pub otp_code: String,
}

/// Start unlinking a provider.
///
/// # Errors
///
/// - `400 Bad Request` `provider_invalid`
/// - `403 Forbidden` `identity_not_linked`, `last_identity`,
///   `provider_not_supported`, `cooldown_active`
/// - `429 Too Many Requests` `unlink_otp_resend_cooldown`
/// - `503 Service Unavailable` `unlink_otp_delivery_failed`
pub async fn request_unlink(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
    Json(payload): Json<UnlinkRequestPayload>,
) -> ApiResult<Json<IssuedUnlinkRequest>> {
    let provider = parse_provider(&payload.provider)?;
    let issued = state.unlinks.request_unlink(account_id, provider).await?;

    metrics::unlink_requests_total(provider.as_str());
    Ok(Json(issued))
}

/// Finish unlinking with the token and OTP.
pub async fn confirm_unlink(
    State(state): State<AppState>,
    Extension(account_id): Extension<AccountId>,
    request_id: RequestId,
    Json(payload): Json<UnlinkConfirmPayload>,
) -> ApiResult<Json<UnlinkConfirmed>> {
    let provider = parse_provider(&payload.provider)?;
    let confirmed = state
        .unlinks
        .confirm_unlink(account_id, provider, &payload.request_token, &payload.otp_code)
        .await
        .inspect_err(|e| {
            if matches!(
                e,
                UnlinkError::OtpInvalid { .. }
                    | UnlinkError::OtpAttemptsExceeded
                    | UnlinkError::OtpRateLimited { .. }
                    | UnlinkError::RequestMismatch
            ) {
                logging::log_security_event(
                    "unlink_otp_failed",
                    Some(account_id),
                    Some(request_id.as_str()),
                    &e.to_string(),
                );
            }
        })?;

    metrics::unlinks_confirmed_total(provider.as_str());
    logging::log_audit_event(
        "identity_unlinked",
        account_id,
        &format!("Unlinked {}", provider),
    );
    Ok(Json(confirmed))
}
