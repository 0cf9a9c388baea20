//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own media store and spool.

use super::constants::*;
use dimora_media_server::asset_store::{AssetStore, SqliteAssetStore};
use dimora_media_server::server::{
    make_app, RequestsLoggingLevel, ServerConfig, UploadSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with an isolated asset store and media directory
///
/// When dropped, the server gracefully shuts down and temp resources are
/// cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Asset store for direct database access in tests
    pub asset_store: Arc<SqliteAssetStore>,

    /// The server config in effect (limits, media dir)
    pub config: ServerConfig,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with default limits.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_config| {}).await
    }

    /// Spawns a test server after letting the caller adjust the config.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be created, the port cannot be bound, or
    /// the server does not become ready within the timeout.
    pub async fn spawn_with(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            media_dir: temp_dir.path().join("media"),
            ..Default::default()
        };
        adjust(&mut config);

        let asset_store =
            Arc::new(SqliteAssetStore::in_memory().expect("Failed to create asset store"));
        let sessions = Arc::new(UploadSessionManager::new(
            temp_dir.path().join("spool"),
            config.hard_ceiling_bytes,
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = make_app(
            config.clone(),
            asset_store.clone() as Arc<dyn AssetStore>,
            sessions,
        )
        .await
        .expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            asset_store,
            config,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the stats endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir cleans up media and spool directories automatically
    }
}
