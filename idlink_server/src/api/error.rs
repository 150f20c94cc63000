//! Error responses.
//!
//! Every failure leaves the API as `{ code, message, reason?,
//! retry_after_seconds?, blocked_until?, attempts_remaining? }` with the HTTP
//! status derived from the error kind.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use idlink::{ErrorCode, ErrorKind};
use serde::{Deserialize, Serialize};

use crate::metrics;

/// JSON body of an error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::StateConflict => StatusCode::GONE,
        ErrorKind::PolicyBlock => StatusCode::FORBIDDEN,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ConflictRequiresHuman => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Malformed request that never reached a manager
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::plain(StatusCode::BAD_REQUEST, code, message)
    }

    /// Missing or invalid credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::plain(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// Route switched off by configuration
    pub fn not_found() -> Self {
        Self::plain(StatusCode::NOT_FOUND, "not_found", "Not found")
    }

    fn plain(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: Some(message.into()),
                reason: None,
                retry_after_seconds: None,
                blocked_until: None,
                attempts_remaining: None,
            },
        }
    }
}

impl<E: ErrorCode + std::fmt::Display> From<E> for ApiError {
    fn from(err: E) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(code = err.code(), "Internal error: {}", err);
        }
        if kind == ErrorKind::RateLimit {
            metrics::rate_limit_hits_total(err.code());
        }

        Self {
            status: status_for(kind),
            body: ErrorBody {
                code: err.code().to_string(),
                message: Some(err.client_message()),
                reason: err.reason().map(str::to_string),
                retry_after_seconds: err.retry_after_seconds(),
                blocked_until: err.blocked_until(),
                attempts_remaining: err.attempts_remaining(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::api_errors_total(&self.body.code);

        let retry_after = self.body.retry_after_seconds;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use idlink::link::LinkError;
    use idlink::unlink::UnlinkError;

    #[test]
    fn test_state_conflict_is_gone() {
        let err = ApiError::from(LinkError::Invalid);
        assert_eq!(err.status, StatusCode::GONE);
        assert_eq!(err.body.code, "link_code_invalid");
    }

    #[test]
    fn test_hints_are_copied() {
        let until = Utc::now();
        let err = ApiError::from(UnlinkError::CooldownActive {
            retry_after_seconds: 30,
            blocked_until: until,
        });
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.body.retry_after_seconds, Some(30));
        assert_eq!(err.body.blocked_until, Some(until));

        let response = err.into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "30");
    }

    #[test]
    fn test_internal_message_is_sanitized() {
        let err = ApiError::from(LinkError::Store(idlink::store::StoreError::Conflict(
            "duplicate key value violates unique constraint".to_string(),
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.message.as_deref(), Some("Internal server error"));
    }
}
