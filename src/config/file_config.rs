use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub media_dir: Option<String>,
    pub spool_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub session_prune_interval_secs: Option<u64>,

    // Feature configs
    pub upload: Option<UploadConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// Single-request body limit in MiB (small/large tier boundary).
    pub small_tier_limit_mib: Option<u64>,
    /// Absolute payload ceiling in MiB.
    pub hard_ceiling_mib: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: FileConfig = toml::from_str(
            r#"
            db_path = "/data/media.db"
            media_dir = "/data/media"
            port = 3001

            [upload]
            small_tier_limit_mib = 8
            hard_ceiling_mib = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path.as_deref(), Some("/data/media.db"));
        assert_eq!(config.port, Some(3001));
        let upload = config.upload.unwrap();
        assert_eq!(upload.small_tier_limit_mib, Some(8));
        assert_eq!(upload.hard_ceiling_mib, Some(200));
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_path.is_none());
        assert!(config.upload.is_none());
    }
}
