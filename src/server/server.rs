use anyhow::Result;
use std::time::{Duration, Instant};

use tower_http::services::ServeDir;
use tracing::info;

use axum::{
    extract::State, middleware, response::IntoResponse, routing::get, Json, Router,
};
use serde::Serialize;

use super::state::{GuardedAssetStore, GuardedSessionManager, ServerState};
use super::{log_requests, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub assets: usize,
    pub stored_bytes: u64,
    pub open_upload_sessions: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let (assets, stored_bytes) = state.asset_store.stats().unwrap_or((0, 0));
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        assets,
        stored_bytes,
        open_upload_sessions: state.sessions.active_count(),
    };
    Json(stats)
}

impl ServerState {
    fn new(
        config: ServerConfig,
        asset_store: GuardedAssetStore,
        sessions: GuardedSessionManager,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            asset_store,
            sessions,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

pub async fn make_app(
    config: ServerConfig,
    asset_store: GuardedAssetStore,
    sessions: GuardedSessionManager,
) -> Result<Router> {
    sessions.init().await?;
    tokio::fs::create_dir_all(&config.media_dir).await?;

    let state = ServerState::new(config.clone(), asset_store, sessions);

    let media_routes = super::media_routes::media_routes(&config).with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let mut app: Router = home_router.nest("/v1/media", media_routes);
    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

pub async fn run_server(
    config: ServerConfig,
    asset_store: GuardedAssetStore,
    sessions: GuardedSessionManager,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, asset_store, sessions).await?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown.await.ok();
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Spawn the periodic reaper for stale chunked upload sessions.
pub fn spawn_session_pruning(
    sessions: GuardedSessionManager,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let pruned = sessions.prune_idle(ttl).await;
            if pruned > 0 {
                info!("Pruned {} stale upload sessions", pruned);
                for _ in 0..pruned {
                    super::metrics::UPLOAD_SESSIONS_ACTIVE.dec();
                }
            }
        }
    })
}
