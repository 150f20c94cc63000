//! PostgreSQL connection pool and embedded schema migrations.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::store::PgStore;

pub mod config;

pub use config::DatabaseConfig;

/// Schema migrations compiled into the binary
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with the pool limits from `config`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use idlink::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let db = Database::connect(&DatabaseConfig::development()).await?;
    ///     db.migrate().await?;
    ///     let _store = db.into_store();
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        log::info!(
            "Connected to PostgreSQL (pool {}..{})",
            config.min_connections,
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }

    /// Hand the pool to the identity store
    pub fn into_store(self) -> PgStore {
        PgStore::new(self.pool)
    }
}
