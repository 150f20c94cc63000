//! Identity linking server.
//!
//! Serves the link code, unlink and manual merge API over PostgreSQL, or
//! over an in-memory store for local development.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use ctrlc::set_handler;
use idlink::db::Database;
use idlink::notify::{LogOtpSender, LogSupportDesk};
use idlink::unlink::OtpHasher;
use idlink::{Clock, IdentityStore, InMemoryStore, SharedClock, SystemClock};
use idlink_server::api::{self, AppState, Services};
use idlink_server::config::ServerConfig;
use idlink_server::{logging, metrics};
use pico_args::Arguments;
use tokio::sync::watch;
use tracing::{error, info, warn};

const HELP: &str = "\
Run the identity linking server

USAGE:
  idlink_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --in-memory              Keep all state in memory (development only)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               JWT signing secret (required)
  OTP_PEPPER               OTP hashing pepper (required)
  SUPPORT_WEBHOOK_SECRET   Enables the support decision endpoint
  METRICS_BIND             Prometheus listener address
  DEV_SIGN_IN_ENABLED      Enables the development sign-in endpoint
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        in_memory: pargs.contains("--in-memory"),
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
    };

    logging::init();

    // Catching signals for graceful shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    let config = ServerConfig::from_env(args.bind, args.database_url, args.in_memory)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    if let Some(metrics_bind) = config.metrics_bind {
        metrics::init_metrics(metrics_bind).map_err(|e| anyhow::anyhow!(e))?;
        info!("Prometheus metrics on http://{}/metrics", metrics_bind);
    }

    let store: Arc<dyn IdentityStore> = match &config.database {
        Some(db_config) => {
            info!("Connecting to database");
            let db = Database::connect(db_config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            db.migrate()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database connected and migrated");
            Arc::new(db.into_store())
        }
        None => {
            warn!("No database configured, state is kept in memory and lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    let clock: SharedClock = Arc::new(SystemClock);

    if !config.policy.support_enabled {
        info!("Manual merge support is disabled");
    }

    let state = AppState::new(Services {
        store: store.clone(),
        clock: clock.clone(),
        policy: config.policy.clone(),
        jwt_secret: config.security.jwt_secret.clone(),
        otp_hasher: OtpHasher::new(config.security.otp_pepper.clone()),
        otp_sender: Arc::new(LogOtpSender::new()),
        support_desk: Arc::new(LogSupportDesk::new()),
        support_secret: config.security.support_webhook_secret.clone(),
        dev_sign_in_enabled: config.dev_sign_in_enabled,
    });

    spawn_purge_task(
        store,
        clock,
        Duration::from_secs(config.purge_interval_secs),
        shutdown_rx.clone(),
    );

    let app = api::create_router(state);

    info!("Starting HTTP server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");

    Ok(())
}

/// Periodically drop expired codes, unlink requests and lockouts
fn spawn_purge_task(
    store: Arc<dyn IdentityStore>,
    clock: SharedClock,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired(clock.now()).await {
                        Ok(0) => {}
                        Ok(removed) => info!("Purged {} expired rows", removed),
                        Err(e) => error!("Purge failed: {}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Graceful shutdown signal
async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
