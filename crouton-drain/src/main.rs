//! crouton-drain - Outbox drain consumer and operator commands
//!
//! `run` drains the outbox into a projector until stopped; the other
//! subcommands inspect and repair the outbox.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crouton_common::api::RequeueRequest;
use crouton_common::config::TomlConfig;
use crouton_common::db::outbox;
use crouton_common::db::settings::set_setting;
use crouton_common::db::{init_database, DrainSettings};
use crouton_common::shutdown::shutdown_signal;
use crouton_drain::{drain_once, run_pool, HttpProjector, MergeProjector, Projector};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crouton-drain")]
#[command(about = "Outbox drain consumer for crouton")]
#[command(version)]
struct Args {
    /// Config file (default: $CROUTON_CONFIG, then the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true, env = "CROUTON_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drain the outbox into the projector until stopped
    Run {
        /// Downstream endpoint receiving events
        #[arg(long, env = "CROUTON_PROJECTOR_URL")]
        projector_url: Option<String>,

        /// Project into an in-memory graph instead of calling downstream
        #[arg(long)]
        dry_run: bool,

        /// Drain what is pending now, then exit
        #[arg(long)]
        once: bool,

        /// Downstream request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Reset failed events to pending with attempts = 0
    Requeue {
        /// Event ids (default: every failed event)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Also revive quarantined (dead) events
        #[arg(long)]
        include_dead: bool,
    },

    /// Print event counts per status
    Stats,

    /// Verify every fact and triple has exactly one insert event
    Check,

    /// Show or change drain settings stored in the database
    Settings {
        /// `key=value` pairs to store, e.g. drain_max_attempts=8
        #[arg(value_parser = parse_assignment)]
        assignments: Vec<(String, u64)>,
    },
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
        "Starting crouton-drain v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let Some(database) = args.database {
        config.database_path = database;
    }

    info!("Database path: {}", config.database_path.display());
    let pool = init_database(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let result = match args.command {
        Command::Run {
            projector_url,
            dry_run,
            once,
            timeout_secs,
        } => {
            let url = projector_url.or(config.drain.projector_url.clone());
            run(&pool, url, dry_run, once, Duration::from_secs(timeout_secs)).await
        }
        Command::Requeue { ids, include_dead } => {
            let request = RequeueRequest {
                ids: if ids.is_empty() { None } else { Some(ids) },
                include_dead,
            };
            let requeued = outbox::requeue(&pool, &request).await?;
            println!("{}", serde_json::json!({ "requeued": requeued }));
            Ok(())
        }
        Command::Stats => {
            let stats = outbox::status_counts(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Check => check(&pool).await,
        Command::Settings { assignments } => settings(&pool, assignments).await,
    };

    pool.close().await;
    result
}

async fn run(
    pool: &SqlitePool,
    projector_url: Option<String>,
    dry_run: bool,
    once: bool,
    timeout: Duration,
) -> Result<()> {
    let settings = DrainSettings::load(pool).await.context("Failed to load drain settings")?;

    let merge = Arc::new(MergeProjector::new());
    let projector: Arc<dyn Projector> = if dry_run {
        info!("Dry run: projecting into memory");
        merge.clone() as Arc<dyn Projector>
    } else {
        let Some(url) = projector_url else {
            bail!("No projector URL. Pass --projector-url, set [drain] projector_url, or use --dry-run");
        };
        info!("Projecting to {}", url);
        Arc::new(HttpProjector::new(url, timeout).context("Failed to build HTTP client")?)
    };

    let stats = if once {
        drain_once(pool, projector, &settings).await?
    } else {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_cancel.cancel();
        });
        run_pool(pool.clone(), projector, settings, cancel).await
    };

    info!(
        claimed = stats.claimed,
        applied = stats.applied,
        failed = stats.failed,
        dead = stats.dead,
        "Drain finished"
    );

    if dry_run {
        let snapshot = merge.snapshot().await;
        info!(
            facts = snapshot.facts.len(),
            triples = snapshot.triples.len(),
            participation = snapshot.participation.len(),
            "Dry-run projection"
        );
    }

    Ok(())
}

async fn check(pool: &SqlitePool) -> Result<()> {
    let report = outbox::audit_coupling(pool).await?;
    println!("{:#?}", report);

    if !report.is_consistent() {
        warn!("Write/event coupling audit found inconsistencies");
        bail!("outbox is inconsistent with facts and triples");
    }

    info!("Write/event coupling audit passed");
    Ok(())
}

async fn settings(pool: &SqlitePool, assignments: Vec<(String, u64)>) -> Result<()> {
    for (key, value) in &assignments {
        if !DrainSettings::KEYS.contains(&key.as_str()) {
            bail!("Unknown setting '{}'. Known: {}", key, DrainSettings::KEYS.join(", "));
        }
        set_setting(pool, key, &value.to_string()).await?;
        info!("Set {} = {}", key, value);
    }

    let settings = DrainSettings::load(pool).await.context("Stored drain settings are invalid")?;
    println!("{:#?}", settings);
    Ok(())
}

fn parse_assignment(s: &str) -> Result<(String, u64), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let value = value
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid value for {}: {}", key, e))?;
    Ok((key.trim().to_string(), value))
}
