//! Database configuration module.
//!
//! Provides configuration structures for database connection management.

use std::env;

use crate::config::parse_env_or;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `DATABASE_URL`: PostgreSQL connection string
    /// - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 20)
    /// - `DB_MIN_CONNECTIONS`: Minimum pool size (default: 2)
    /// - `DB_CONNECTION_TIMEOUT`: Connection timeout in seconds (default: 10)
    /// - `DB_IDLE_TIMEOUT`: Idle timeout in seconds (default: 600)
    /// - `DB_MAX_LIFETIME`: Max lifetime in seconds (default: 1800)
    ///
    /// # Returns
    ///
    /// * `Option<DatabaseConfig>` - `None` when `DATABASE_URL` is not set
    pub fn from_env() -> Option<Self> {
        let database_url = env::var("DATABASE_URL").ok()?;
        let defaults = Self::development();

        Some(Self {
            database_url,
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_env_or(
                "DB_CONNECTION_TIMEOUT",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME", defaults.max_lifetime_secs),
        })
    }

    /// Create a default configuration for development
    ///
    /// Uses `postgres://postgres@localhost/idlink` as the database URL
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/idlink".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_requires_url() {
        // SAFETY: serialised with every other env-mutating test
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        assert!(DatabaseConfig::from_env().is_none());

        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://u@h/db");
            std::env::set_var("DB_MAX_CONNECTIONS", "7");
        }
        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.database_url, "postgres://u@h/db");
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.idle_timeout_secs, 600);

        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("DB_MAX_CONNECTIONS");
        }
    }
}
