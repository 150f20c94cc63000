//! JWT session issuer.

use super::{
    errors::{AuthError, AuthResult},
    models::{AccessTokenClaims, SessionTokens, TokenType},
};
use chrono::Duration;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::identity::AccountId;

/// Issues and verifies session credentials
pub trait SessionIssuer: Send + Sync {
    /// Mint a fresh token pair for an account
    fn issue(&self, account_id: AccountId) -> AuthResult<SessionTokens>;

    /// Decode and validate an access token
    fn verify_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims>;
}

/// Stateless HS256 issuer
#[derive(Clone)]
pub struct JwtSessionIssuer {
    jwt_secret: String,
    clock: SharedClock,
    access_token_duration: Duration,
    refresh_token_duration: Duration,
}

impl JwtSessionIssuer {
    /// Create a new issuer
    ///
    /// # Arguments
    ///
    /// * `jwt_secret` - Secret key for JWT signing
    /// * `clock` - Source of `iat`/`exp`
    pub fn new(jwt_secret: String, clock: SharedClock) -> Self {
        Self {
            jwt_secret,
            clock,
            access_token_duration: Duration::minutes(15), // 15 minutes
            refresh_token_duration: Duration::days(7),    // 7 days
        }
    }

    fn generate_token(&self, account_id: AccountId, typ: TokenType) -> AuthResult<String> {
        let now = self.clock.now();
        let lifetime = match typ {
            TokenType::Access => self.access_token_duration,
            TokenType::Refresh => self.refresh_token_duration,
        };
        let claims = AccessTokenClaims {
            sub: account_id,
            typ,
            jti: Uuid::new_v4().to_string(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }
}

impl SessionIssuer for JwtSessionIssuer {
    fn issue(&self, account_id: AccountId) -> AuthResult<SessionTokens> {
        Ok(SessionTokens {
            access_token: self.generate_token(account_id, TokenType::Access)?,
            refresh_token: self.generate_token(account_id, TokenType::Refresh)?,
        })
    }

    fn verify_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        if token_data.claims.typ != TokenType::Access {
            return Err(AuthError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use std::sync::Arc;

    const SECRET: &str = "test_jwt_secret_that_is_long_enough_for_hs256";

    #[test]
    fn test_issue_and_verify() {
        let issuer = JwtSessionIssuer::new(SECRET.to_string(), Arc::new(SystemClock));
        let tokens = issuer.issue(7).unwrap();

        let claims = issuer.verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.typ, TokenType::Access);
        assert_ne!(tokens.access_token, tokens.refresh_token);
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let issuer = JwtSessionIssuer::new(SECRET.to_string(), Arc::new(SystemClock));
        let tokens = issuer.issue(7).unwrap();

        let result = issuer.verify_access_token(&tokens.refresh_token);
        assert!(matches!(result, Err(AuthError::WrongTokenType)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtSessionIssuer::new(SECRET.to_string(), Arc::new(SystemClock));
        let other = JwtSessionIssuer::new(
            "another_secret_that_is_also_long_enough".to_string(),
            Arc::new(SystemClock),
        );
        let tokens = issuer.issue(1).unwrap();

        let err = other.verify_access_token(&tokens.access_token).unwrap_err();
        assert_eq!(err.client_message(), "Authentication failed");
    }

    #[test]
    fn test_expired_token_rejected() {
        let clock = ManualClock::new(chrono::Utc::now() - Duration::hours(2));
        let issuer = JwtSessionIssuer::new(SECRET.to_string(), Arc::new(clock));
        let tokens = issuer.issue(1).unwrap();

        assert!(issuer.verify_access_token(&tokens.access_token).is_err());
    }
}
