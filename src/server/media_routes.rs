//! Media HTTP routes.
//!
//! Provides endpoints for:
//! - Small-tier single-request uploads (multipart)
//! - Chunked upload sessions for large payloads
//! - Duplicate checks by digest or filename
//! - The usage ledger (attach/detach/batch check)
//! - Fetching and deleting stored assets

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::asset_store::{Asset, MediaKind};
use crate::pipeline::sha256_hex;
use crate::server::messages::{
    ChunkAck, DuplicateCheckRequest, DuplicateCheckResponse, ErrorResponse,
    PayloadTooLargeResponse, StartSessionRequest, StartSessionResponse, UploadResponse,
    UsageAttachResponse, UsageCheckRequest, UsageCheckResponse, UsageRequest,
};
use crate::server::metrics::{record_dedup_hit, record_error, record_upload};
use crate::server::sessions::{ChunkOutcome, SessionError};
use crate::server::state::{GuardedAssetStore, ServerState};

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

// =============================================================================
// Persistence shared by both tiers
// =============================================================================

struct PersistMeta {
    filename: String,
    kind: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    duration_ms: Option<i64>,
    tier: &'static str,
}

/// Persist a received payload: hash it, run the authoritative dedup check,
/// and only then write the file and the index row.
///
/// Returns the asset and whether it resolved to an existing one.
fn persist_payload(
    state: &ServerState,
    data: &[u8],
    meta: PersistMeta,
) -> anyhow::Result<(Asset, bool)> {
    let start = Instant::now();

    // The server hashes every payload it receives; large-file hashing was
    // only skipped client-side because it is interactive there
    let fingerprint = sha256_hex(data);

    if let Some(existing) = state.asset_store.find_by_fingerprint(&fingerprint)? {
        record_dedup_hit("server");
        info!(
            "Upload of {} matched existing asset {} by content",
            meta.filename, existing.id
        );
        return Ok((existing, true));
    }

    let kind = resolve_kind(meta.kind.as_deref(), &meta.filename, data);
    let asset_id = uuid::Uuid::new_v4().to_string();
    let storage_path = state.config.media_dir.join(storage_filename(&asset_id, &meta.filename));

    std::fs::create_dir_all(&state.config.media_dir)?;
    std::fs::write(&storage_path, data)?;

    let asset = Asset::new(
        &asset_id,
        format!("/v1/media/{}/file", asset_id),
        kind,
        data.len() as i64,
        &meta.filename,
        Some(fingerprint),
    )
    .with_dimensions(meta.width, meta.height)
    .with_duration(meta.duration_ms);

    if let Err(e) = state.asset_store.create_asset(&asset) {
        // Lost a race against an identical in-flight upload: the unique
        // fingerprint index makes the first writer win
        if let Ok(Some(existing)) = state.asset_store.find_by_fingerprint(
            asset.fingerprint.as_deref().unwrap_or_default(),
        ) {
            let _ = std::fs::remove_file(&storage_path);
            record_dedup_hit("server");
            return Ok((existing, true));
        }
        let _ = std::fs::remove_file(&storage_path);
        return Err(e);
    }

    record_upload(kind.as_str(), meta.tier, data.len() as u64, start.elapsed());
    info!(
        "Persisted {} asset {} ({} bytes) from {}",
        kind.as_str(),
        asset_id,
        data.len(),
        meta.filename
    );
    Ok((asset, false))
}

fn resolve_kind(declared: Option<&str>, filename: &str, data: &[u8]) -> MediaKind {
    if let Some(kind) = declared.and_then(MediaKind::parse) {
        return kind;
    }
    if let Some(kind) = infer::get(data).and_then(|k| MediaKind::from_mime(k.mime_type())) {
        return kind;
    }
    if crate::pipeline::StagingArea::is_supported_video(filename) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

/// Stored files keep the original extension so sniffing and serving stay
/// cheap.
fn storage_filename(asset_id: &str, original: &str) -> String {
    match std::path::Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some(ext) => format!("{}.{}", asset_id, ext.to_lowercase()),
        None => asset_id.to_string(),
    }
}

fn asset_file_path(state: &ServerState, asset: &Asset) -> std::path::PathBuf {
    state
        .config
        .media_dir
        .join(storage_filename(&asset.id, &asset.original_filename))
}

// =============================================================================
// Upload Routes
// =============================================================================

/// POST /upload - Small-tier upload (multipart/form-data)
async fn upload_media(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Response {
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut kind: Option<String> = None;
    let mut width: Option<i32> = None;
    let mut height: Option<i32> = None;
    let mut duration_ms: Option<i64> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                match field.bytes().await {
                    Ok(bytes) => data = Some(bytes.to_vec()),
                    Err(e) => {
                        warn!("Failed to read file data: {}", e);
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(ErrorResponse {
                                error: "Failed to read file".to_string(),
                            }),
                        )
                            .into_response();
                    }
                }
            }
            "kind" => {
                if let Ok(bytes) = field.bytes().await {
                    kind = Some(String::from_utf8_lossy(&bytes).to_string());
                }
            }
            "width" => {
                if let Ok(bytes) = field.bytes().await {
                    width = String::from_utf8_lossy(&bytes).parse().ok();
                }
            }
            "height" => {
                if let Ok(bytes) = field.bytes().await {
                    height = String::from_utf8_lossy(&bytes).parse().ok();
                }
            }
            "duration_ms" => {
                if let Ok(bytes) = field.bytes().await {
                    duration_ms = String::from_utf8_lossy(&bytes).parse().ok();
                }
            }
            // The client's own digest is advisory; the server recomputes
            "fingerprint" => {
                let _ = field.bytes().await;
            }
            _ => {}
        }
    }

    let filename = match filename {
        Some(f) if !f.is_empty() => f,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "No filename provided".to_string(),
                }),
            )
                .into_response();
        }
    };

    let data = match data {
        Some(d) if !d.is_empty() => d,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "No file data provided".to_string(),
                }),
            )
                .into_response();
        }
    };

    // The small tier carries the whole payload in one request; anything
    // bigger must use a chunked session
    let limit = state.config.small_tier_limit_bytes;
    if data.len() as u64 > limit {
        record_error("payload_too_large", "upload");
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(PayloadTooLargeResponse {
                error: "Payload exceeds the single-request limit".to_string(),
                size_bytes: data.len() as u64,
                limit_bytes: limit,
            }),
        )
            .into_response();
    }

    debug!("Uploading {} ({} bytes)", filename, data.len());

    let meta = PersistMeta {
        filename: filename.clone(),
        kind,
        width,
        height,
        duration_ms,
        tier: "small",
    };

    match persist_payload(&state, &data, meta) {
        Ok((asset, duplicate)) => Json(UploadResponse {
            url: asset.url.clone(),
            filename,
            media: asset,
            duplicate,
        })
        .into_response(),
        Err(e) => {
            warn!("Failed to persist upload: {}", e);
            record_error("persist_failed", "upload");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /upload/sessions - Start a chunked upload session
async fn start_session(
    State(state): State<ServerState>,
    Json(body): Json<StartSessionRequest>,
) -> Response {
    match state.sessions.start(&body).await {
        Ok(session_id) => {
            crate::server::metrics::UPLOAD_SESSIONS_ACTIVE.inc();
            Json(StartSessionResponse { session_id }).into_response()
        }
        Err(SessionError::TooLarge {
            size_bytes,
            limit_bytes,
        }) => {
            record_error("payload_too_large", "upload_session");
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(PayloadTooLargeResponse {
                    error: "Payload exceeds the upload ceiling".to_string(),
                    size_bytes,
                    limit_bytes,
                }),
            )
                .into_response()
        }
        Err(e @ SessionError::InvalidSession(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to start upload session: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /upload/sessions/{id}/chunks/{index} - Accept one chunk
async fn upload_chunk(
    State(state): State<ServerState>,
    Path((session_id, index)): Path<(String, u32)>,
    body: axum::body::Bytes,
) -> Response {
    let outcome = match state.sessions.write_chunk(&session_id, index, &body).await {
        Ok(outcome) => outcome,
        Err(e @ SessionError::NotFound(_)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
        Err(e @ SessionError::InvalidChunk(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!("Chunk write failed for session {}: {}", session_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match outcome {
        ChunkOutcome::Partial {
            received,
            remaining,
        } => Json(ChunkAck {
            received,
            remaining,
            media: None,
            duplicate: false,
        })
        .into_response(),
        ChunkOutcome::Complete(done) => {
            crate::server::metrics::UPLOAD_SESSIONS_ACTIVE.dec();

            let data = match tokio::fs::read(&done.spool_path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to read assembled session {}: {}", session_id, e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse {
                            error: e.to_string(),
                        }),
                    )
                        .into_response();
                }
            };
            let _ = tokio::fs::remove_file(&done.spool_path).await;

            let meta = PersistMeta {
                filename: done.filename,
                kind: done.kind,
                width: done.width,
                height: done.height,
                duration_ms: done.duration_ms,
                tier: "large",
            };

            match persist_payload(&state, &data, meta) {
                Ok((asset, duplicate)) => Json(ChunkAck {
                    received: index + 1,
                    remaining: 0,
                    media: Some(asset),
                    duplicate,
                })
                .into_response(),
                Err(e) => {
                    warn!("Failed to persist session {}: {}", session_id, e);
                    record_error("persist_failed", "upload_session");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse {
                            error: e.to_string(),
                        }),
                    )
                        .into_response()
                }
            }
        }
    }
}

/// DELETE /upload/sessions/{id} - Abort a session, dropping its spool
async fn abort_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.abort(&session_id).await {
        Ok(()) => {
            crate::server::metrics::UPLOAD_SESSIONS_ACTIVE.dec();
            info!("Aborted upload session {}", session_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(SessionError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to abort session {}: {}", session_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Duplicate Check
// =============================================================================

/// POST /duplicates/check - Look up an asset by digest or original filename
async fn check_duplicate(
    State(store): State<GuardedAssetStore>,
    Json(body): Json<DuplicateCheckRequest>,
) -> Response {
    let lookup = if let Some(hash) = &body.hash {
        store.find_by_fingerprint(hash)
    } else if let Some(name) = &body.original_name {
        store.find_by_filename(name)
    } else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Either hash or original_name is required".to_string(),
            }),
        )
            .into_response();
    };

    match lookup {
        Ok(Some(asset)) => {
            let locations = store.usage_locations(&asset.id).unwrap_or_default();
            record_dedup_hit("client");
            Json(DuplicateCheckResponse {
                exists: true,
                media: Some(asset),
                locations,
            })
            .into_response()
        }
        Ok(None) => Json(DuplicateCheckResponse {
            exists: false,
            media: None,
            locations: vec![],
        })
        .into_response(),
        Err(e) => {
            warn!("Duplicate check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Duplicate check failed").into_response()
        }
    }
}

// =============================================================================
// Usage Ledger
// =============================================================================

/// POST /{id}/usage - Attach an asset to a location
async fn attach_usage(
    State(store): State<GuardedAssetStore>,
    Path(asset_id): Path<String>,
    Json(body): Json<UsageRequest>,
) -> Response {
    match store.get_asset(&asset_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to get asset {}: {}", asset_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get asset").into_response();
        }
    }

    match store.attach_usage(&asset_id, &body.into()) {
        Ok(attached) => {
            let usage_count = store
                .get_asset(&asset_id)
                .ok()
                .flatten()
                .map(|a| a.usage_count)
                .unwrap_or_default();
            Json(UsageAttachResponse {
                attached,
                usage_count,
            })
            .into_response()
        }
        Err(e) => {
            warn!("Failed to attach usage for {}: {}", asset_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// DELETE /{id}/usage - Detach an asset from a location
async fn detach_usage(
    State(store): State<GuardedAssetStore>,
    Path(asset_id): Path<String>,
    Json(body): Json<UsageRequest>,
) -> Response {
    match store.detach_usage(&asset_id, &body.into()) {
        Ok(detached) => {
            let usage_count = store
                .get_asset(&asset_id)
                .ok()
                .flatten()
                .map(|a| a.usage_count)
                .unwrap_or_default();
            Json(UsageAttachResponse {
                attached: detached,
                usage_count,
            })
            .into_response()
        }
        Err(e) => {
            warn!("Failed to detach usage for {}: {}", asset_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /usage/check - Batch usage lookup for deletion confirmation
async fn check_usage(
    State(store): State<GuardedAssetStore>,
    Json(body): Json<UsageCheckRequest>,
) -> Response {
    match store.usage_summaries(&body.media_ids) {
        Ok(usages) => Json(UsageCheckResponse { usages }).into_response(),
        Err(e) => {
            warn!("Usage check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Usage check failed").into_response()
        }
    }
}

// =============================================================================
// Asset Routes
// =============================================================================

/// GET / - List assets, newest first
async fn list_media(
    State(store): State<GuardedAssetStore>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    match store.list_assets(pagination.limit) {
        Ok(assets) => Json(assets).into_response(),
        Err(e) => {
            warn!("Failed to list assets: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list assets").into_response()
        }
    }
}

/// GET /{id} - Asset descriptor
async fn get_media(
    State(store): State<GuardedAssetStore>,
    Path(asset_id): Path<String>,
) -> Response {
    match store.get_asset(&asset_id) {
        Ok(Some(asset)) => Json(asset).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to get asset {}: {}", asset_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get asset").into_response()
        }
    }
}

/// GET /{id}/file - Stored bytes with a sniffed content type
async fn get_media_file(
    State(state): State<ServerState>,
    Path(asset_id): Path<String>,
) -> Response {
    let asset = match state.asset_store.get_asset(&asset_id) {
        Ok(Some(asset)) => asset,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to get asset {}: {}", asset_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get asset").into_response();
        }
    };

    let path = asset_file_path(&state, &asset);
    let buffer = match tokio::fs::read(&path).await {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!("Stored file missing for asset {}: {}", asset_id, e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mime = infer::get(&buffer)
        .map(|k| k.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .body(buffer.into())
        .unwrap()
}

/// DELETE /{id} - Delete an asset, blocked while the ledger references it
async fn delete_media(
    State(state): State<ServerState>,
    Path(asset_id): Path<String>,
) -> Response {
    let asset = match state.asset_store.get_asset(&asset_id) {
        Ok(Some(asset)) => asset,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to get asset {}: {}", asset_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get asset").into_response();
        }
    };

    match state.asset_store.usage_locations(&asset_id) {
        Ok(locations) if !locations.is_empty() => {
            return (
                StatusCode::CONFLICT,
                Json(UsageCheckResponse {
                    usages: vec![crate::asset_store::AssetUsageSummary {
                        asset_id: asset_id.clone(),
                        usage_count: locations.len() as i64,
                        locations,
                    }],
                }),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to read usage for {}: {}", asset_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read usage").into_response();
        }
    }

    match state.asset_store.delete_asset(&asset_id) {
        Ok(()) => {
            let path = asset_file_path(&state, &asset);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove stored file {:?}: {}", path, e);
                }
            }
            crate::server::metrics::ASSETS_TOTAL.sub(1.0);
            crate::server::metrics::STORED_BYTES.sub(asset.size_bytes as f64);
            info!("Deleted asset {}", asset_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!("Failed to delete asset {}: {}", asset_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the media routes.
///
/// Upload routes:
/// - POST /upload - Small-tier multipart upload
/// - POST /upload/sessions - Start a chunked session
/// - DELETE /upload/sessions/{id} - Abort a session
/// - POST /upload/sessions/{id}/chunks/{index} - Transfer one chunk
///
/// Index routes:
/// - POST /duplicates/check - Duplicate lookup
/// - POST /usage/check - Batch usage lookup
/// - POST|DELETE /{id}/usage - Attach/detach a usage location
/// - GET / - List assets
/// - GET|DELETE /{id} - Descriptor / delete
/// - GET /{id}/file - Stored bytes
pub fn media_routes(config: &super::ServerConfig) -> Router<ServerState> {
    // Multipart framing overhead on top of the payload itself
    let small_body_limit = (config.small_tier_limit_bytes * 2) as usize;
    let chunk_body_limit = (crate::pipeline::DEFAULT_CHUNK_SIZE_BYTES * 2) as usize;

    let upload_routes = Router::new()
        .route("/upload", post(upload_media))
        .layer(DefaultBodyLimit::max(small_body_limit));

    let session_routes = Router::new()
        .route("/upload/sessions", post(start_session))
        .route("/upload/sessions/{id}", axum::routing::delete(abort_session))
        .route(
            "/upload/sessions/{id}/chunks/{index}",
            post(upload_chunk),
        )
        .layer(DefaultBodyLimit::max(chunk_body_limit));

    let index_routes = Router::new()
        .route("/duplicates/check", post(check_duplicate))
        .route("/usage/check", post(check_usage))
        .route("/{id}/usage", post(attach_usage).delete(detach_usage))
        .route("/", get(list_media))
        .route("/{id}", get(get_media).delete(delete_media))
        .route("/{id}/file", get(get_media_file));

    upload_routes.merge(session_routes).merge(index_routes)
}
