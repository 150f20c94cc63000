//! Authentication error types.

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// A refresh token was presented where an access token is required
    #[error("Wrong token type")]
    WrongTokenType,
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        match self {
            // Sanitize JWT errors - don't expose token structure
            AuthError::JwtError(_) => "Authentication failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
