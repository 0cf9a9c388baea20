mod file_config;

pub use file_config::{FileConfig, UploadConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub spool_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub session_ttl_secs: u64,
    pub session_prune_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub session_ttl_secs: u64,
    pub session_prune_interval_secs: u64,

    // Upload limits (with defaults)
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub small_tier_limit_bytes: u64,
    pub hard_ceiling_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            small_tier_limit_bytes: crate::pipeline::DEFAULT_SMALL_TIER_LIMIT_BYTES,
            hard_ceiling_bytes: crate::pipeline::DEFAULT_HARD_CEILING_BYTES,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .or_else(|| cli.media_dir.clone())
            .unwrap_or_else(|| {
                db_path
                    .parent()
                    .map(|p| p.join("media"))
                    .unwrap_or_else(|| PathBuf::from("media"))
            });

        let spool_dir = file
            .spool_dir
            .map(PathBuf::from)
            .or_else(|| cli.spool_dir.clone())
            .unwrap_or_else(|| media_dir.join("spool"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let session_ttl_secs = file.session_ttl_secs.unwrap_or(cli.session_ttl_secs);
        let session_prune_interval_secs = file
            .session_prune_interval_secs
            .unwrap_or(cli.session_prune_interval_secs);

        // Upload limits - merge file config with defaults
        let upload_file = file.upload.unwrap_or_default();
        let defaults = UploadSettings::default();
        let upload = UploadSettings {
            small_tier_limit_bytes: upload_file
                .small_tier_limit_mib
                .map(|mib| mib * MIB)
                .unwrap_or(defaults.small_tier_limit_bytes),
            hard_ceiling_bytes: upload_file
                .hard_ceiling_mib
                .map(|mib| mib * MIB)
                .unwrap_or(defaults.hard_ceiling_bytes),
        };

        if upload.small_tier_limit_bytes >= upload.hard_ceiling_bytes {
            bail!(
                "small tier limit ({}) must be below the hard ceiling ({})",
                upload.small_tier_limit_bytes,
                upload.hard_ceiling_bytes
            );
        }

        Ok(Self {
            db_path,
            media_dir,
            spool_dir,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            session_ttl_secs,
            session_prune_interval_secs,
            upload,
        })
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
