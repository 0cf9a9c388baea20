//! Data models for the asset index and usage ledger.
//!
//! An Asset is the durable, persisted media object. It is immutable after
//! insertion except for its usage count and last-used timestamp, which are
//! maintained transactionally by the store alongside the usage records.

use serde::{Deserialize, Serialize};

/// Kind of media stored in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Classify from a MIME type string (e.g. from content sniffing).
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// A persisted media asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Unique identifier.
    pub id: String,
    /// Public URL of the stored file.
    pub url: String,
    /// Media kind.
    pub kind: MediaKind,
    /// Size of the stored payload in bytes.
    pub size_bytes: i64,
    /// Filename as originally uploaded.
    pub original_filename: String,
    /// Pixel width, when known.
    pub width: Option<i32>,
    /// Pixel height, when known.
    pub height: Option<i32>,
    /// Duration in milliseconds (video only).
    pub duration_ms: Option<i64>,
    /// URL of a thumbnail, when one exists.
    pub thumbnail_url: Option<String>,
    /// SHA-256 hex digest of the stored payload. Nullable for legacy rows;
    /// once set it is never recomputed or mutated.
    pub fingerprint: Option<String>,
    /// Number of live usage records referencing this asset.
    pub usage_count: i64,
    /// Creation timestamp (Unix millis).
    pub created_at: i64,
    /// Last time a usage record was attached (Unix millis).
    pub last_used_at: Option<i64>,
}

impl Asset {
    /// Create a new asset row with zero usages.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        kind: MediaKind,
        size_bytes: i64,
        original_filename: impl Into<String>,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            size_bytes,
            original_filename: original_filename.into(),
            width: None,
            height: None,
            duration_ms: None,
            thumbnail_url: None,
            fingerprint,
            usage_count: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
            last_used_at: None,
        }
    }

    /// Set pixel dimensions.
    pub fn with_dimensions(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set video duration.
    pub fn with_duration(mut self, duration_ms: Option<i64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// A (property, zone, step) location referencing an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLocation {
    pub property_id: String,
    pub zone_id: String,
    pub step_id: String,
}

/// Usage summary for one asset, returned by batch deletion checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUsageSummary {
    pub asset_id: String,
    pub usage_count: i64,
    pub locations: Vec<UsageLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_roundtrip() {
        for kind in [MediaKind::Image, MediaKind::Video] {
            let s = kind.as_str();
            assert_eq!(MediaKind::parse(s), Some(kind));
        }
        assert_eq!(MediaKind::parse("audio"), None);
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn test_asset_creation() {
        let asset = Asset::new(
            "a1",
            "/v1/media/a1/file",
            MediaKind::Video,
            1024,
            "tour.mp4",
            Some("abc123".to_string()),
        )
        .with_dimensions(Some(1920), Some(1080))
        .with_duration(Some(12000));

        assert_eq!(asset.id, "a1");
        assert_eq!(asset.usage_count, 0);
        assert_eq!(asset.width, Some(1920));
        assert_eq!(asset.duration_ms, Some(12000));
        assert!(asset.last_used_at.is_none());
    }
}
