//! HTTP API for identity linking.
//!
//! # Architecture
//!
//! The API is built with:
//! - **Axum**: Async web framework
//! - **Tower**: Middleware for CORS, authentication, request ids
//! - **JWT**: Bearer access tokens issued on sign-in and merge
//!
//! # Modules
//!
//! - [`link`]: Link code creation, preview, confirmation and manual merge submission
//! - [`identities`]: Linked identity listing
//! - [`unlink`]: Two-step identity unlinking
//! - [`merge_tickets`]: Manual merge status
//! - [`support`]: Adjudicator decision hook
//! - [`auth`]: Development sign-in
//! - [`middleware`]: Authentication middleware for protected endpoints
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                         - Health check (public)
//! POST /api/v1/auth/sign-in                            - Development sign-in (public, off by default)
//! POST /api/v1/account/link-code                       - Create link code
//! POST /api/v1/account/link-code/preview               - Preview link code
//! POST /api/v1/account/link-code/confirm               - Confirm link code
//! POST /api/v1/account/link-code/manual-merge          - Submit manual merge
//! GET  /api/v1/account/manual-merge/latest             - Latest manual merge ticket
//! GET  /api/v1/account/identities                      - List linked identities
//! POST /api/v1/account/identities/unlink/request       - Request unlink OTP
//! POST /api/v1/account/identities/unlink/confirm       - Confirm unlink
//! POST /api/v1/support/manual-merge/{ticket_id}/decision - Record decision (support secret)
//! ```

pub mod auth;
pub mod error;
pub mod identities;
pub mod link;
pub mod merge_tickets;
pub mod middleware;
pub mod request_id;
pub mod support;
pub mod unlink;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use idlink::auth::{JwtSessionIssuer, SessionIssuer};
use idlink::identity::IdentityManager;
use idlink::link::LinkCodeManager;
use idlink::merge_ticket::MergeTicketManager;
use idlink::notify::{OtpSender, SupportDesk};
use idlink::security::RateLimiter;
use idlink::unlink::{OtpHasher, UnlinkManager};
use idlink::{IdentityStore, LinkPolicy, Provider, SharedClock};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub use error::{ApiError, ApiResult, ErrorBody};

/// Everything needed to assemble the managers
pub struct Services {
    pub store: Arc<dyn IdentityStore>,
    pub clock: SharedClock,
    pub policy: LinkPolicy,
    pub jwt_secret: String,
    pub otp_hasher: OtpHasher,
    pub otp_sender: Arc<dyn OtpSender>,
    pub support_desk: Arc<dyn SupportDesk>,
    pub support_secret: Option<String>,
    pub dev_sign_in_enabled: bool,
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request (cheap due to Arc wrappers).
#[derive(Clone)]
pub struct AppState {
    pub links: Arc<LinkCodeManager>,
    pub unlinks: Arc<UnlinkManager>,
    pub tickets: Arc<MergeTicketManager>,
    pub identities: Arc<IdentityManager>,
    pub sessions: Arc<dyn SessionIssuer>,
    pub store: Arc<dyn IdentityStore>,
    pub support_secret: Option<Arc<str>>,
    pub dev_sign_in_enabled: bool,
}

impl AppState {
    /// Wire the managers over one store, clock and policy
    pub fn new(services: Services) -> Self {
        let Services {
            store,
            clock,
            policy,
            jwt_secret,
            otp_hasher,
            otp_sender,
            support_desk,
            support_secret,
            dev_sign_in_enabled,
        } = services;

        let sessions: Arc<dyn SessionIssuer> =
            Arc::new(JwtSessionIssuer::new(jwt_secret, clock.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), clock.clone()));

        let links = LinkCodeManager::new(
            store.clone(),
            sessions.clone(),
            rate_limiter.clone(),
            clock.clone(),
            policy.clone(),
        );
        let unlinks = UnlinkManager::new(
            store.clone(),
            otp_sender,
            otp_hasher,
            rate_limiter.clone(),
            clock.clone(),
            policy.clone(),
        );
        let tickets = MergeTicketManager::new(
            store.clone(),
            support_desk,
            rate_limiter,
            clock.clone(),
            policy.clone(),
        );
        let identities = IdentityManager::new(store.clone(), sessions.clone(), clock, policy);

        Self {
            links: Arc::new(links),
            unlinks: Arc::new(unlinks),
            tickets: Arc::new(tickets),
            identities: Arc::new(identities),
            sessions,
            store,
            support_secret: support_secret.map(Arc::from),
            dev_sign_in_enabled,
        }
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use idlink_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/auth/sign-in", post(auth::sign_in))
        .route(
            "/support/manual-merge/{ticket_id}/decision",
            post(support::record_decision),
        );

    // Protected routes (require authentication middleware)
    let protected_routes = Router::new()
        .route("/account/link-code", post(link::create_link_code))
        .route("/account/link-code/preview", post(link::preview_link_code))
        .route("/account/link-code/confirm", post(link::confirm_link_code))
        .route(
            "/account/link-code/manual-merge",
            post(link::submit_manual_merge),
        )
        .route(
            "/account/manual-merge/latest",
            get(merge_tickets::latest_manual_merge),
        )
        .route("/account/identities", get(identities::list_identities))
        .route(
            "/account/identities/unlink/request",
            post(unlink::request_unlink),
        )
        .route(
            "/account/identities/unlink/confirm",
            post(unlink::confirm_unlink),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Parse a provider name from a request body
pub(crate) fn parse_provider(name: &str) -> ApiResult<Provider> {
    name.parse()
        .map_err(|e: idlink::identity::UnknownProvider| {
            ApiError::bad_request("provider_invalid", e.to_string())
        })
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = state.store.ping().await.is_ok();

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if store_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
