//! SQLite store for the asset index and usage ledger.

use super::models::{Asset, AssetUsageSummary, MediaKind, UsageLocation};
use super::schema::MEDIA_SCHEMA_SQL;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for asset index and usage ledger operations.
///
/// All ledger mutations are atomic per record: attaching or detaching a usage
/// location updates the usage row and the asset's usage_count in a single
/// transaction.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait AssetStore: Send + Sync {
    // ==================== Asset Index ====================

    /// Insert a new asset row.
    fn create_asset(&self, asset: &Asset) -> Result<()>;

    /// Get an asset by ID.
    fn get_asset(&self, id: &str) -> Result<Option<Asset>>;

    /// Find an asset by exact content fingerprint.
    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Asset>>;

    /// Find the most recently created asset with this original filename.
    fn find_by_filename(&self, filename: &str) -> Result<Option<Asset>>;

    /// List assets, newest first.
    fn list_assets(&self, limit: usize) -> Result<Vec<Asset>>;

    /// Delete an asset row. Fails if any usage records still reference it.
    fn delete_asset(&self, id: &str) -> Result<()>;

    // ==================== Usage Ledger ====================

    /// Attach an asset to a location, incrementing its usage count.
    ///
    /// Idempotent: returns false (and leaves the count untouched) when the
    /// exact (asset, property, zone, step) tuple is already attached.
    fn attach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<bool>;

    /// Detach an asset from a location, decrementing its usage count.
    ///
    /// Returns false when no such attachment existed.
    fn detach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<bool>;

    /// All locations currently referencing an asset.
    fn usage_locations(&self, asset_id: &str) -> Result<Vec<UsageLocation>>;

    /// Usage summaries for a batch of assets (deletion-confirmation flows).
    fn usage_summaries(&self, asset_ids: &[String]) -> Result<Vec<AssetUsageSummary>>;

    // ==================== Stats ====================

    /// Number of assets and total stored bytes, for metrics.
    fn stats(&self) -> Result<(usize, u64)>;
}

/// SQLite implementation of AssetStore.
pub struct SqliteAssetStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssetStore {
    /// Open or create a media database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open media database: {:?}", path))?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(MEDIA_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<Asset> {
        Ok(Asset {
            id: row.get("id")?,
            url: row.get("url")?,
            kind: MediaKind::parse(&row.get::<_, String>("kind")?).unwrap_or(MediaKind::Image),
            size_bytes: row.get("size_bytes")?,
            original_filename: row.get("original_filename")?,
            width: row.get("width")?,
            height: row.get("height")?,
            duration_ms: row.get("duration_ms")?,
            thumbnail_url: row.get("thumbnail_url")?,
            fingerprint: row.get("fingerprint")?,
            usage_count: row.get("usage_count")?,
            created_at: row.get("created_at")?,
            last_used_at: row.get("last_used_at")?,
        })
    }

    fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<UsageLocation> {
        Ok(UsageLocation {
            property_id: row.get("property_id")?,
            zone_id: row.get("zone_id")?,
            step_id: row.get("step_id")?,
        })
    }
}

impl AssetStore for SqliteAssetStore {
    fn create_asset(&self, asset: &Asset) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO media_assets (
                id, url, kind, size_bytes, original_filename,
                width, height, duration_ms, thumbnail_url,
                fingerprint, usage_count, created_at, last_used_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                asset.id,
                asset.url,
                asset.kind.as_str(),
                asset.size_bytes,
                asset.original_filename,
                asset.width,
                asset.height,
                asset.duration_ms,
                asset.thumbnail_url,
                asset.fingerprint,
                asset.usage_count,
                asset.created_at,
                asset.last_used_at,
            ],
        )?;
        Ok(())
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT * FROM media_assets WHERE id = ?1",
                params![id],
                Self::row_to_asset,
            )
            .optional()?;
        Ok(result)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Asset>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT * FROM media_assets WHERE fingerprint = ?1",
                params![fingerprint],
                Self::row_to_asset,
            )
            .optional()?;
        Ok(result)
    }

    fn find_by_filename(&self, filename: &str) -> Result<Option<Asset>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT * FROM media_assets WHERE original_filename = ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![filename],
                Self::row_to_asset,
            )
            .optional()?;
        Ok(result)
    }

    fn list_assets(&self, limit: usize) -> Result<Vec<Asset>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM media_assets ORDER BY created_at DESC LIMIT ?1")?;
        let assets = stmt
            .query_map(params![limit], Self::row_to_asset)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }

    fn delete_asset(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let usage_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM media_usage WHERE asset_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if usage_count > 0 {
            anyhow::bail!("Asset {} is referenced by {} locations", id, usage_count);
        }

        tx.execute("DELETE FROM media_assets WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn attach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM media_assets WHERE id = ?1)",
            params![asset_id],
            |row| row.get(0),
        )?;
        if !exists {
            anyhow::bail!("Asset not found: {}", asset_id);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let inserted = tx.execute(
            r#"
            INSERT INTO media_usage (asset_id, property_id, zone_id, step_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (asset_id, property_id, zone_id, step_id) DO NOTHING
            "#,
            params![
                asset_id,
                location.property_id,
                location.zone_id,
                location.step_id,
                now,
            ],
        )?;

        if inserted == 1 {
            tx.execute(
                "UPDATE media_assets SET usage_count = usage_count + 1, last_used_at = ?2
                 WHERE id = ?1",
                params![asset_id, now],
            )?;
        }

        tx.commit()?;
        Ok(inserted == 1)
    }

    fn detach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM media_usage
             WHERE asset_id = ?1 AND property_id = ?2 AND zone_id = ?3 AND step_id = ?4",
            params![
                asset_id,
                location.property_id,
                location.zone_id,
                location.step_id,
            ],
        )?;

        if deleted == 1 {
            tx.execute(
                "UPDATE media_assets SET usage_count = usage_count - 1 WHERE id = ?1",
                params![asset_id],
            )?;
        }

        tx.commit()?;
        Ok(deleted == 1)
    }

    fn usage_locations(&self, asset_id: &str) -> Result<Vec<UsageLocation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT property_id, zone_id, step_id FROM media_usage
             WHERE asset_id = ?1 ORDER BY created_at",
        )?;
        let locations = stmt
            .query_map(params![asset_id], Self::row_to_location)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locations)
    }

    fn usage_summaries(&self, asset_ids: &[String]) -> Result<Vec<AssetUsageSummary>> {
        let mut summaries = Vec::with_capacity(asset_ids.len());
        for id in asset_ids {
            let locations = self.usage_locations(id)?;
            summaries.push(AssetUsageSummary {
                asset_id: id.clone(),
                usage_count: locations.len() as i64,
                locations,
            });
        }
        Ok(summaries)
    }

    fn stats(&self) -> Result<(usize, u64)> {
        let conn = self.conn.lock().unwrap();
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM media_assets",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as usize, bytes as u64))
    }
}
