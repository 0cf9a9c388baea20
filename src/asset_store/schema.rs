//! Database schema for the asset index and usage ledger.
//!
//! Two tables:
//! - media_assets: one row per persisted asset
//! - media_usage: one row per (asset, property, zone, step) attachment
//!
//! The usage_count column on media_assets is maintained in the same
//! transaction as every media_usage insert/delete, so it always equals the
//! number of live usage rows for the asset.

/// SQL schema for the media database.
pub const MEDIA_SCHEMA_SQL: &str = r#"
-- Persisted media assets
CREATE TABLE IF NOT EXISTS media_assets (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    original_filename TEXT NOT NULL,

    -- Optional intrinsic metadata
    width INTEGER,
    height INTEGER,
    duration_ms INTEGER,
    thumbnail_url TEXT,

    -- Content address (SHA-256 hex); nullable for legacy rows
    fingerprint TEXT,

    -- Ledger counter, kept in lockstep with media_usage rows
    usage_count INTEGER NOT NULL DEFAULT 0,

    -- Timestamps (Unix milliseconds)
    created_at INTEGER NOT NULL,
    last_used_at INTEGER
);

-- Usage ledger: every location referencing an asset
CREATE TABLE IF NOT EXISTS media_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    property_id TEXT NOT NULL,
    zone_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,

    UNIQUE (asset_id, property_id, zone_id, step_id),
    FOREIGN KEY (asset_id) REFERENCES media_assets(id) ON DELETE CASCADE
);

-- Indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_media_assets_fingerprint
    ON media_assets(fingerprint) WHERE fingerprint IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_media_assets_filename ON media_assets(original_filename);
CREATE INDEX IF NOT EXISTS idx_media_usage_asset ON media_usage(asset_id);
"#;

/// Current schema version.
pub const MEDIA_SCHEMA_VERSION: i32 = 1;
