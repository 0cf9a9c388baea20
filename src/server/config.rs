use super::RequestsLoggingLevel;
use std::path::PathBuf;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Directory holding persisted media files.
    pub media_dir: PathBuf,
    /// Single-request body limit separating the small and large upload tiers.
    pub small_tier_limit_bytes: u64,
    /// Absolute payload ceiling enforced before anything is stored.
    pub hard_ceiling_bytes: u64,
    pub frontend_dir_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            media_dir: PathBuf::from("media"),
            small_tier_limit_bytes: crate::pipeline::DEFAULT_SMALL_TIER_LIMIT_BYTES,
            hard_ceiling_bytes: crate::pipeline::DEFAULT_HARD_CEILING_BYTES,
            frontend_dir_path: None,
        }
    }
}
