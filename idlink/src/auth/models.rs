//! Session data models.

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

/// Session tokens (access + refresh)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Kind of JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: AccountId, // Account ID
    pub typ: TokenType,
    pub jti: String,    // Unique token ID
    pub exp: i64,       // Expiration timestamp
    pub iat: i64,       // Issued at timestamp
}
