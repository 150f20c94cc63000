//! Request correlation and HTTP metrics.
//!
//! Every response carries `x-request-id`, taken from the caller when it is a
//! sane value and minted otherwise. Handlers that log security events take
//! [`RequestId`] as an extractor so the log line can be joined with the
//! access log.

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderMap, HeaderValue, StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

use crate::metrics;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied id that is propagated
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the current request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN);

        match supplied {
            Some(id) => Self(id.to_string()),
            None => Self(Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Tag the request, time it, and echo the id on the response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    request.extensions_mut().insert(request_id.clone());
    tracing::debug!(request_id = %request_id.as_str(), %method, %path, "Request started");

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::http_requests_total(method.as_str(), &path, status);
    metrics::http_request_duration_ms(method.as_str(), &path, elapsed_ms);

    tracing::info!(
        request_id = %request_id.as_str(),
        %method,
        %path,
        status,
        elapsed_ms,
        "Request completed"
    );

    response
}
