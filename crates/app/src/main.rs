use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kitty_import::NarrationParser;
use kitty_match::{MemberMatcher, RemoteBatchMatcher};
use kitty_reconcile::ReconcileEngine;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::Command;
use config::{AppConfig, CONFIG_FILE};

/// Membership contribution reconciliation.
#[derive(Parser, Debug)]
#[command(name = "kitty", version, about)]
struct Args {
    /// Configuration file (defaults to kitty.toml in the data directory)
    #[arg(short, long, env = "KITTY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "KITTY_DATABASE")]
    database: Option<PathBuf>,

    /// Name recorded as the actor in the audit trail
    #[arg(long, global = true, env = "KITTY_ACTOR", default_value = "operator")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

pub struct AppState {
    pub engine: ReconcileEngine,
    pub config: AppConfig,
    pub actor: String,
    pub database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data_dir = config::data_dir()?;
    let config_path = args.config.clone().unwrap_or_else(|| data_dir.join(CONFIG_FILE));
    let config = AppConfig::load(&config_path)?;

    let default_filter = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let database = config.database_path(args.database.as_deref(), &data_dir);
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = kitty_storage::create_db(&database)
        .await
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    info!(database = %database.display(), "database ready");

    let engine = build_engine(pool, &config)?;
    let state = AppState {
        engine,
        config,
        actor: args.actor,
        database,
    };

    commands::run(&state, args.command).await
}

fn build_engine(pool: kitty_storage::DbPool, config: &AppConfig) -> Result<ReconcileEngine> {
    let parser = NarrationParser::new(config.parser.clone());
    let matcher = MemberMatcher::new(config.matcher.clone());
    let engine = ReconcileEngine::new(pool, parser, matcher);

    if !config.remote_matcher.enabled {
        return Ok(engine);
    }
    let remote = RemoteBatchMatcher::new(&config.remote_matcher.base_url, config.remote_matcher.timeout())
        .context("Failed to configure the remote matcher")?;
    info!(base_url = remote.base_url(), "using remote matcher");
    Ok(engine.with_batch_matcher(Arc::new(remote)))
}
