//! Transport selection and transfer execution.
//!
//! Payloads at or under the single-request body limit go up as one multipart
//! POST. Anything larger goes through a resumable session: fixed-size chunks
//! with a shared session id, each retried independently on failure so a
//! dropped chunk never restarts the whole transfer.

use crate::asset_store::Asset;
use crate::server::messages::{
    ChunkAck, PayloadTooLargeResponse, StartSessionRequest, StartSessionResponse, UploadResponse,
};
use futures::StreamExt;
use rand::Rng;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Single-request body limit separating the small and large tiers.
pub const DEFAULT_SMALL_TIER_LIMIT_BYTES: u64 = 4 * 1024 * 1024;

/// Absolute ceiling enforced before any transfer begins.
pub const DEFAULT_HARD_CEILING_BYTES: u64 = 100 * 1024 * 1024;

/// Chunk size for large-tier transfers.
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 2 * 1024 * 1024;

/// Cap on concurrent large-tier transfers, to avoid saturating the link.
pub const DEFAULT_MAX_CONCURRENT_LARGE_TRANSFERS: usize = 3;

/// Progress callback, 0..=100. Advisory only.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// User-actionable and not retryable as-is: the input must shrink.
    #[error("payload too large: {size_bytes} bytes (limit {limit_bytes})")]
    PayloadTooLarge { size_bytes: u64, limit_bytes: u64 },

    /// Transient network/server failure; retryable by the caller.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected server response: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

/// Transfer tier, chosen by final payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    Small,
    Large,
}

impl SizeTier {
    pub fn for_size(size_bytes: u64, small_tier_limit: u64) -> Self {
        if size_bytes <= small_tier_limit {
            Self::Small
        } else {
            Self::Large
        }
    }
}

/// Retry policy for failed chunk transfers: capped exponential backoff.
#[derive(Debug, Clone)]
pub struct ChunkRetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl ChunkRetryPolicy {
    /// Backoff duration before the given retry, without jitter.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }

    fn backoff_with_jitter(&self, retry_count: u32) -> Duration {
        let base = self.backoff_ms(retry_count);
        let jitter = if base > 0 {
            rand::rng().random_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

impl Default for ChunkRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Metadata accompanying an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub filename: String,
    pub kind: Option<String>,
    pub fingerprint: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_ms: Option<i64>,
}

/// Outcome of a transfer: the persisted asset, and whether the server
/// resolved it to an existing asset instead of storing the payload.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub asset: Asset,
    pub deduplicated: bool,
}

/// Uploads payloads to the media server, selecting the transport by size.
pub struct Uploader {
    base_url: String,
    client: reqwest::Client,
    small_tier_limit: u64,
    hard_ceiling: u64,
    chunk_size: u64,
    retry: ChunkRetryPolicy,
    large_transfer_permits: Arc<Semaphore>,
}

impl Uploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            small_tier_limit: DEFAULT_SMALL_TIER_LIMIT_BYTES,
            hard_ceiling: DEFAULT_HARD_CEILING_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            retry: ChunkRetryPolicy::default(),
            large_transfer_permits: Arc::new(Semaphore::new(
                DEFAULT_MAX_CONCURRENT_LARGE_TRANSFERS,
            )),
        }
    }

    pub fn with_limits(mut self, small_tier_limit: u64, hard_ceiling: u64) -> Self {
        self.small_tier_limit = small_tier_limit;
        self.hard_ceiling = hard_ceiling;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry_policy(mut self, retry: ChunkRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn small_tier_limit(&self) -> u64 {
        self.small_tier_limit
    }

    /// Transfer a staged payload, choosing the tier by its size.
    pub async fn upload(
        &self,
        path: &Path,
        size_bytes: u64,
        meta: &UploadMetadata,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransportError> {
        if size_bytes > self.hard_ceiling {
            return Err(TransportError::PayloadTooLarge {
                size_bytes,
                limit_bytes: self.hard_ceiling,
            });
        }

        match SizeTier::for_size(size_bytes, self.small_tier_limit) {
            SizeTier::Small => self.upload_small(path, size_bytes, meta, cancel, progress).await,
            SizeTier::Large => self.upload_large(path, size_bytes, meta, cancel, progress).await,
        }
    }

    /// Small tier: a single multipart request with byte-counting progress.
    async fn upload_small(
        &self,
        path: &Path,
        size_bytes: u64,
        meta: &UploadMetadata,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransportError> {
        let data = tokio::fs::read(path).await?;
        let total = data.len().max(1) as u64;
        let sent = Arc::new(AtomicU64::new(0));

        let chunks: Vec<Vec<u8>> = data.chunks(64 * 1024).map(|c| c.to_vec()).collect();
        let sent_in_stream = sent.clone();
        let progress_in_stream = progress.clone();
        let stream = futures::stream::iter(chunks).map(move |chunk: Vec<u8>| {
            let so_far =
                sent_in_stream.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
            progress_in_stream(((so_far * 100) / total).min(100) as u8);
            Ok::<Vec<u8>, std::io::Error>(chunk)
        });

        let file_part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            size_bytes,
        )
        .file_name(meta.filename.clone());

        let mut form = reqwest::multipart::Form::new().part("file", file_part);
        if let Some(kind) = &meta.kind {
            form = form.text("kind", kind.clone());
        }
        if let Some(fingerprint) = &meta.fingerprint {
            form = form.text("fingerprint", fingerprint.clone());
        }
        if let Some(width) = meta.width {
            form = form.text("width", width.to_string());
        }
        if let Some(height) = meta.height {
            form = form.text("height", height.to_string());
        }
        if let Some(duration_ms) = meta.duration_ms {
            form = form.text("duration_ms", duration_ms.to_string());
        }

        let request = self
            .client
            .post(format!("{}/v1/media/upload", self.base_url))
            .multipart(form)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request => result.map_err(|e| TransportError::Transfer(e.to_string()))?,
        };

        let response = Self::map_error_status(response, size_bytes).await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        progress(100);
        if body.duplicate {
            info!("Server resolved upload to existing asset {}", body.media.id);
        }
        Ok(TransferOutcome {
            asset: body.media,
            deduplicated: body.duplicate,
        })
    }

    /// Large tier: chunked resumable session, one permit per transfer.
    async fn upload_large(
        &self,
        path: &Path,
        size_bytes: u64,
        meta: &UploadMetadata,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransportError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            permit = self.large_transfer_permits.acquire() => {
                permit.map_err(|_| TransportError::Transfer("transfer pool closed".into()))?
            }
        };

        let total_chunks = size_bytes.div_ceil(self.chunk_size) as u32;

        let start = StartSessionRequest {
            filename: meta.filename.clone(),
            kind: meta.kind.clone(),
            total_size: size_bytes,
            total_chunks,
            chunk_size: self.chunk_size,
            width: meta.width,
            height: meta.height,
            duration_ms: meta.duration_ms,
        };

        let response = self
            .client
            .post(format!("{}/v1/media/upload/sessions", self.base_url))
            .json(&start)
            .send()
            .await
            .map_err(|e| TransportError::Transfer(e.to_string()))?;
        let response = Self::map_error_status(response, size_bytes).await?;
        let session: StartSessionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        info!(
            "Started upload session {} ({} chunks of {} bytes)",
            session.session_id, total_chunks, self.chunk_size
        );

        let result = self
            .transfer_chunks(path, size_bytes, &session.session_id, total_chunks, cancel, progress)
            .await;

        // Let the server retire an aborted session instead of waiting for
        // the idle reaper
        if matches!(result, Err(TransportError::Cancelled)) {
            let url = format!(
                "{}/v1/media/upload/sessions/{}",
                self.base_url, session.session_id
            );
            let client = self.client.clone();
            tokio::spawn(async move {
                let _ = client.delete(url).send().await;
            });
        }

        result
    }

    async fn transfer_chunks(
        &self,
        path: &Path,
        size_bytes: u64,
        session_id: &str,
        total_chunks: u32,
        cancel: &CancellationToken,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransportError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; self.chunk_size as usize];

        for index in 0..total_chunks {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let offset = index as u64 * self.chunk_size;
            let len = (size_bytes - offset).min(self.chunk_size) as usize;
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer[..len]).await?;
            let chunk = buffer[..len].to_vec();

            let ack = self
                .send_chunk_with_retry(session_id, index, chunk, cancel)
                .await?;

            let sent = offset + len as u64;
            progress(((sent * 100) / size_bytes).min(100) as u8);

            if let Some(asset) = ack.media {
                progress(100);
                if ack.duplicate {
                    info!(
                        "Server resolved session {} to existing asset {}",
                        session_id, asset.id
                    );
                }
                return Ok(TransferOutcome {
                    asset,
                    deduplicated: ack.duplicate,
                });
            }

            debug!(
                "Chunk {}/{} acknowledged ({} remaining)",
                index + 1,
                total_chunks,
                ack.remaining
            );
        }

        Err(TransportError::Protocol(
            "session completed without an asset descriptor".into(),
        ))
    }

    /// Send one chunk, retrying transient failures with capped backoff.
    /// Only this chunk is retried; earlier chunks stay acknowledged.
    async fn send_chunk_with_retry(
        &self,
        session_id: &str,
        index: u32,
        chunk: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ChunkAck, TransportError> {
        let url = format!(
            "{}/v1/media/upload/sessions/{}/chunks/{}",
            self.base_url, session_id, index
        );

        let mut retry_count = 0;
        loop {
            let request = self.client.post(&url).body(chunk.clone()).send();
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = request => result,
            };

            let error = match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<ChunkAck>()
                        .await
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Ok(response) if response.status().is_server_error() => {
                    TransportError::Transfer(format!("chunk {} got {}", index, response.status()))
                }
                Ok(response) => {
                    return Err(TransportError::Protocol(format!(
                        "chunk {} rejected with {}",
                        index,
                        response.status()
                    )));
                }
                Err(e) => TransportError::Transfer(e.to_string()),
            };

            if retry_count >= self.retry.max_retries {
                return Err(error);
            }

            let backoff = self.retry.backoff_with_jitter(retry_count);
            warn!(
                "Chunk {} failed ({}), retry {}/{} in {:?}",
                index,
                error,
                retry_count + 1,
                self.retry.max_retries,
                backoff
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            retry_count += 1;
        }
    }

    /// Map a non-success response, keeping 413 distinguishable from generic
    /// failures.
    async fn map_error_status(
        response: reqwest::Response,
        size_bytes: u64,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            let limit_bytes = response
                .json::<PayloadTooLargeResponse>()
                .await
                .map(|b| b.limit_bytes)
                .unwrap_or(0);
            return Err(TransportError::PayloadTooLarge {
                size_bytes,
                limit_bytes,
            });
        }
        if status.is_server_error() {
            return Err(TransportError::Transfer(format!("server returned {}", status)));
        }
        Err(TransportError::Protocol(format!("server returned {}", status)))
    }
}
