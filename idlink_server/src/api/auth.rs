//! Development sign-in.
//!
//! Provider OAuth flows live outside this service; this endpoint trusts the
//! posted identity and is only mounted in effect when
//! `DEV_SIGN_IN_ENABLED=true`.
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/sign-in \
//!   -H "Content-Type: application/json" \
//!   -d '{"provider": "telegram", "provider_user_id": "100200300"}'
//! ```

use axum::{Json, extract::State};
use idlink::identity::SignInResult;
use serde::Deserialize;

use super::{ApiError, ApiResult, AppState, parse_provider};
use crate::logging;

#[derive(Debug, Deserialize)]
pub struct SignInPayload {
    pub provider: String,
    pub provider_user_id: String,
}

/// Sign in with a provider identity, registering an account on first use.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInPayload>,
) -> ApiResult<Json<SignInResult>> {
    if !state.dev_sign_in_enabled {
        return Err(ApiError::not_found());
    }

    let provider = parse_provider(&payload.provider)?;
    let result = state
        .identities
        .sign_in(provider, &payload.provider_user_id)
        .await?;

    if result.created {
        logging::log_audit_event(
            "account_registered",
            result.user.id,
            &format!("Registered through {}", provider),
        );
    }
    Ok(Json(result))
}
