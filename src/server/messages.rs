//! Request/response bodies shared by the HTTP surface and the client
//! pipeline.

use crate::asset_store::{Asset, AssetUsageSummary, UsageLocation};
use serde::{Deserialize, Serialize};

/// Generic error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a 413 response: distinguishable from generic failures so the
/// caller can suggest a concrete remedy.
#[derive(Debug, Serialize, Deserialize)]
pub struct PayloadTooLargeResponse {
    pub error: String,
    pub size_bytes: u64,
    pub limit_bytes: u64,
}

/// Successful small-tier upload, or a server-detected duplicate.
///
/// The server runs its own content-addressed dedup check on every received
/// payload; when it fires, the existing asset is returned instead of a new
/// row.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub media: Asset,
    #[serde(default)]
    pub duplicate: bool,
}

/// Start a chunked upload session.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub filename: String,
    pub kind: Option<String>,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

/// Acknowledgement of a received chunk. `media` is set only by the request
/// that completed the session.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkAck {
    pub received: u32,
    pub remaining: u32,
    #[serde(default)]
    pub media: Option<Asset>,
    #[serde(default)]
    pub duplicate: bool,
}

/// Duplicate check by content digest or original filename.
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateCheckRequest {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateCheckResponse {
    pub exists: bool,
    #[serde(default)]
    pub media: Option<Asset>,
    #[serde(default)]
    pub locations: Vec<UsageLocation>,
}

/// Attach or detach a usage location.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageRequest {
    pub property_id: String,
    pub zone_id: String,
    pub step_id: String,
}

impl From<UsageRequest> for UsageLocation {
    fn from(r: UsageRequest) -> Self {
        UsageLocation {
            property_id: r.property_id,
            zone_id: r.zone_id,
            step_id: r.step_id,
        }
    }
}

impl From<&UsageLocation> for UsageRequest {
    fn from(l: &UsageLocation) -> Self {
        UsageRequest {
            property_id: l.property_id.clone(),
            zone_id: l.zone_id.clone(),
            step_id: l.step_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageAttachResponse {
    pub attached: bool,
    pub usage_count: i64,
}

/// Batch usage lookup for deletion-confirmation flows.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageCheckRequest {
    pub media_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageCheckResponse {
    pub usages: Vec<AssetUsageSummary>,
}
