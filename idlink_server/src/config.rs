//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use idlink::config::{LinkPolicy, parse_env_or};
use idlink::db::DatabaseConfig;
use std::net::SocketAddr;

/// Default HTTP bind address
const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration; `None` runs on the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Security configuration
    pub security: SecurityConfig,
    /// Linking policy
    pub policy: LinkPolicy,
    /// Prometheus scrape address
    pub metrics_bind: Option<SocketAddr>,
    /// Expose the development sign-in route
    pub dev_sign_in_enabled: bool,
    /// Seconds between sweeps of expired records
    pub purge_interval_secs: u64,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// OTP hashing pepper (required)
    pub otp_pepper: String,
    /// Shared secret of the manual merge adjudicator; the decision route is
    /// disabled without it
    pub support_webhook_secret: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `in_memory` - Ignore any database settings and keep state in memory
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or_else(default_bind),
        };

        let database = if in_memory {
            None
        } else {
            match database_url_override {
                Some(database_url) => Some(DatabaseConfig {
                    database_url,
                    ..DatabaseConfig::from_env().unwrap_or_else(DatabaseConfig::development)
                }),
                None => DatabaseConfig::from_env(),
            }
        };

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let otp_pepper = std::env::var("OTP_PEPPER").map_err(|_| ConfigError::MissingRequired {
            var: "OTP_PEPPER".to_string(),
            hint: "Generate with: openssl rand -hex 16".to_string(),
        })?;

        let support_webhook_secret = std::env::var("SUPPORT_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let config = ServerConfig {
            bind,
            database,
            security: SecurityConfig {
                jwt_secret,
                otp_pepper,
                support_webhook_secret,
            },
            policy: LinkPolicy::from_env(),
            metrics_bind: parse_addr("METRICS_BIND")?,
            dev_sign_in_enabled: parse_env_or("DEV_SIGN_IN_ENABLED", false),
            purge_interval_secs: parse_env_or("PURGE_INTERVAL_SECS", 300),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.otp_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "OTP_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        if let Some(secret) = &self.security.support_webhook_secret
            && secret.len() < 32
        {
            return Err(ConfigError::Invalid {
                var: "SUPPORT_WEBHOOK_SECRET".to_string(),
                reason: "Must be at least 32 characters".to_string(),
            });
        }

        if self.policy.link_code_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "LINK_CODE_MAX_ATTEMPTS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.policy.unlink_otp_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "UNLINK_OTP_MAX_ATTEMPTS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.policy.unlink_otp_resend_cooldown >= self.policy.unlink_otp_ttl {
            return Err(ConfigError::Invalid {
                var: "UNLINK_OTP_RESEND_COOLDOWN_SECS".to_string(),
                reason: format!(
                    "Must be shorter than the OTP lifetime ({}s)",
                    self.policy.unlink_otp_ttl.num_seconds()
                ),
            });
        }

        if self.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PURGE_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Parse an optional socket address variable, rejecting malformed values
fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => {
            value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid {
                    var: key.to_string(),
                    reason: format!("Not a socket address (e.g. {DEFAULT_BIND})"),
                })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: default_bind(),
            database: None,
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
                otp_pepper: "a".repeat(16),
                support_webhook_secret: None,
            },
            policy: LinkPolicy::default(),
            metrics_bind: None,
            dev_sign_in_enabled: false,
            purge_interval_secs: 300,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_default_bind_matches_documented() {
        assert_eq!(default_bind().to_string(), DEFAULT_BIND);
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = config();
        config.security.jwt_secret = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_short_webhook_secret_rejected() {
        let mut config = config();
        config.security.support_webhook_secret = Some("tiny".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resend_cooldown_must_fit_ttl() {
        let mut config = config();
        config.policy.unlink_otp_resend_cooldown = config.policy.unlink_otp_ttl;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("UNLINK_OTP_RESEND_COOLDOWN_SECS"));
    }
}
