//! Session issuance for accounts.
//!
//! Sign-in and a confirmed merge both end with fresh credentials:
//! - JWT access tokens (15-minute expiry)
//! - JWT refresh tokens (7-day expiry)
//!
//! Issuance sits behind the [`SessionIssuer`] trait so deployments can hand
//! it to an external session service.
//!
//! ## Example
//!
//! ```no_run
//! use idlink::auth::{JwtSessionIssuer, SessionIssuer};
//! use idlink::clock::SystemClock;
//! use std::sync::Arc;
//!
//! let issuer = JwtSessionIssuer::new(
//!     "a-very-long-jwt-secret-of-32-chars!".to_string(),
//!     Arc::new(SystemClock),
//! );
//! let tokens = issuer.issue(42).unwrap();
//! let claims = issuer.verify_access_token(&tokens.access_token).unwrap();
//! assert_eq!(claims.sub, 42);
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use manager::{JwtSessionIssuer, SessionIssuer};
pub use models::{AccessTokenClaims, SessionTokens, TokenType};
