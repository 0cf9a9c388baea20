//! Asset index and usage ledger.
//!
//! The durable, server-side half of the media pipeline:
//! - media_assets: content-addressed index of persisted uploads
//! - media_usage: ledger of every (property, zone, step) location that
//!   references an asset, used to warn before destructive deletion

mod models;
mod schema;
mod store;

pub use models::{Asset, AssetUsageSummary, MediaKind, UsageLocation};
pub use schema::{MEDIA_SCHEMA_SQL, MEDIA_SCHEMA_VERSION};
pub use store::{AssetStore, SqliteAssetStore};

#[cfg(feature = "mock")]
pub use store::MockAssetStore;
