//! Authentication middleware for protected endpoints.
//!
//! Validates the JWT access token from the `Authorization: Bearer <token>`
//! header and injects the account id into request extensions.
//!
//! # Extracting the Account ID
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use idlink::AccountId;
//!
//! async fn protected_handler(Extension(account_id): Extension<AccountId>) -> String {
//!     format!("Authenticated as account {}", account_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use super::{ApiError, AppState};

/// Authentication middleware that validates JWT tokens and injects the account ID.
///
/// # Behavior
///
/// - **Success**: Token valid → Injects `AccountId` into request extensions → Calls next handler
/// - **Missing header**: Returns `401 Unauthorized`
/// - **Invalid format**: Returns `401 Unauthorized`
/// - **Invalid/expired/refresh token**: Returns `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    match state.sessions.verify_access_token(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims.sub);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!("Rejected access token: {}", e);
            Err(ApiError::unauthorized("Invalid or expired token"))
        }
    }
}
