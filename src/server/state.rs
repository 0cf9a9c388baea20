use axum::extract::FromRef;

use crate::asset_store::AssetStore;
use std::sync::Arc;
use std::time::Instant;

use super::sessions::UploadSessionManager;
use super::ServerConfig;

pub type GuardedAssetStore = Arc<dyn AssetStore>;
pub type GuardedSessionManager = Arc<UploadSessionManager>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub asset_store: GuardedAssetStore,
    pub sessions: GuardedSessionManager,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedAssetStore {
    fn from_ref(input: &ServerState) -> Self {
        input.asset_store.clone()
    }
}

impl FromRef<ServerState> for GuardedSessionManager {
    fn from_ref(input: &ServerState) -> Self {
        input.sessions.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
