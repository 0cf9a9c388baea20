use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dimora_media_server::asset_store::{AssetStore, SqliteAssetStore};
use dimora_media_server::config::{AppConfig, CliConfig, FileConfig};
use dimora_media_server::server::{
    self, run_server, spawn_session_pruning, RequestsLoggingLevel, ServerConfig,
    UploadSessionManager,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite media database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Directory for persisted media files.
    #[clap(long, value_parser = parse_path)]
    pub media_dir: Option<PathBuf>,

    /// Directory for chunked-upload spool files.
    #[clap(long, value_parser = parse_path)]
    pub spool_dir: Option<PathBuf>,

    /// Optional TOML config file; its values override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Seconds a chunked upload session may sit idle before being pruned.
    #[clap(long, default_value_t = 3600)]
    pub session_ttl_secs: u64,

    /// Interval in seconds between session pruning runs.
    #[clap(long, default_value_t = 600)]
    pub session_prune_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };

    let cli_config = CliConfig {
        db_path: cli_args.db_path,
        media_dir: cli_args.media_dir,
        spool_dir: cli_args.spool_dir,
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level,
        frontend_dir_path: cli_args.frontend_dir_path,
        session_ttl_secs: cli_args.session_ttl_secs,
        session_prune_interval_secs: cli_args.session_prune_interval_secs,
    };

    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening SQLite media database at {:?}...", config.db_path);
    let asset_store = Arc::new(SqliteAssetStore::open(&config.db_path)?);

    // Initialize metrics system
    info!("Initializing metrics...");
    server::metrics::init_metrics();
    let (asset_count, stored_bytes) = asset_store.stats()?;
    server::metrics::init_asset_metrics(asset_count, stored_bytes);

    let sessions = Arc::new(UploadSessionManager::new(
        config.spool_dir.clone(),
        config.upload.hard_ceiling_bytes,
    ));

    // Reap chunked sessions that went quiet
    spawn_session_pruning(
        sessions.clone(),
        Duration::from_secs(config.session_ttl_secs),
        Duration::from_secs(config.session_prune_interval_secs),
    );

    // Metrics listener on its own port
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = server::metrics::run_metrics_server(metrics_port).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_tx = Mutex::new(Some(shutdown_tx));
    ctrlc::set_handler(move || {
        info!("Received ctrl-c");
        if let Some(tx) = shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    })?;

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        media_dir: config.media_dir.clone(),
        small_tier_limit_bytes: config.upload.small_tier_limit_bytes,
        hard_ceiling_bytes: config.upload.hard_ceiling_bytes,
        frontend_dir_path: config.frontend_dir_path.clone(),
    };

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    run_server(server_config, asset_store, sessions, shutdown_rx).await
}
