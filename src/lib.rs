//! Dimora Media Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod asset_store;
pub mod config;
pub mod pipeline;
pub mod server;

// Re-export commonly used types for convenience
pub use asset_store::{Asset, AssetStore, MediaKind, SqliteAssetStore, UsageLocation};
pub use pipeline::{AssetLifecycle, PipelineContext, RunOutcome, UploadState};
pub use server::{run_server, RequestsLoggingLevel};
