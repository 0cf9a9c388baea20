pub mod config;
mod http_layers;
mod media_routes;
pub mod messages;
pub mod metrics;
pub mod server;
pub mod sessions;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use sessions::{ChunkOutcome, CompletedSession, SessionError, UploadSessionManager};
#[allow(unused_imports)] // Used by main.rs
pub use server::{make_app, run_server, spawn_session_pruning};
