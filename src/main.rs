use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use erdms::config::Config;
use erdms::AppState;

#[derive(Parser, Debug)]
#[command(name = "erdms")]
#[command(author, version, about = "Order-management and document workflow backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "erdms.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

/// How often expired sessions are swept from the database
const SESSION_SWEEP_INTERVAL_SECS: u64 = 600;

/// How often abandoned pending logins are swept from memory
const PKCE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Timeout for outbound identity-platform and Graph API calls
const OUTBOUND_TIMEOUT_SECS: u64 = 15;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ERDMS v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database (pool + migrations)
    let db = erdms::db::init(&config.database).await?;

    // Shared outbound HTTP client
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(OUTBOUND_TIMEOUT_SECS))
        .build()?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), db.clone(), http));

    // Background maintenance tasks
    erdms::api::rate_limit::spawn_cleanup_task(
        state.rate_limiter.clone(),
        config.rate_limit.cleanup_interval,
    );
    erdms::crypto::spawn_cleanup_task(state.pkce.clone(), PKCE_SWEEP_INTERVAL_SECS);
    spawn_session_sweep(db.clone());

    // Create API router
    let app = erdms::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn spawn_session_sweep(db: erdms::DbPool) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS);
        loop {
            tokio::time::sleep(interval).await;
            match erdms::db::purge_expired_sessions(&db).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!("Purged {} expired sessions", purged),
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
