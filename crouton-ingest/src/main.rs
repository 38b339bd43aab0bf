//! crouton-ingest - Signature-authenticated fact ingestion service
//!
//! Accepts NDJSON batches on `POST /v1/croutons` and commits each batch,
//! together with its outbox events, in a single transaction.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crouton_common::config::{BatchPolicy, TomlConfig};
use crouton_common::db::{init_database_with, DbOptions};
use crouton_common::shutdown::shutdown_signal;
use crouton_ingest::{build_router, AppState};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crouton-ingest")]
#[command(about = "Fact and triple ingestion service")]
#[command(version)]
struct Args {
    /// Config file (default: $CROUTON_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CROUTON_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "CROUTON_DATABASE")]
    database: Option<PathBuf>,

    /// Accept valid lines of a batch and report invalid ones individually
    #[arg(long)]
    lenient: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::resolve(args.config.as_deref()).context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        "Starting crouton-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if args.lenient {
        config.ingest.batch_policy = BatchPolicy::Lenient;
    }

    // Fail closed: no secret, no service
    let secret = match config.resolve_signing_secret() {
        Ok(secret) => secret,
        Err(e) => {
            error!("{}", e);
            return Err(e).context("Refusing to start without a signing secret");
        }
    };

    info!("Database path: {}", config.database_path.display());
    let db_options = DbOptions::with_lock_budget(config.ingest.max_lock_wait_ms);
    let pool = init_database_with(&config.database_path, &db_options)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("✓ Database ready");

    info!(
        batch_policy = ?config.ingest.batch_policy,
        max_line_bytes = config.ingest.max_line_bytes,
        max_body_bytes = config.ingest.max_body_bytes,
        "Ingestion limits"
    );

    let state = AppState::new(pool.clone(), &secret, config.ingest.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("crouton-ingest listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}
