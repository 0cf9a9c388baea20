//! Client-side media ingestion pipeline.
//!
//! Per-asset workflow:
//! 1. Stage bytes locally and create the transient preview
//! 2. Fingerprint content (SHA-256 under the interactive ceiling)
//! 3. Resolve duplicates against the server index (best-effort)
//! 4. Suspend for a caller decision when a candidate exists
//! 5. Compress oversized video through the quality ladder
//! 6. Transfer through the size-appropriate transport
//! 7. Swap the preview for the durable asset reference

mod compressor;
mod dedup;
mod fingerprint;
mod manager;
mod models;
mod staging;
mod transport;

pub use compressor::{
    AdaptiveCompressor, CompressionError, CompressionOutcome, FfmpegEncoder, QualityRung,
    VideoEncoder, VideoInfo, DEFAULT_COMPRESS_TARGET_BYTES,
};
pub use dedup::{
    AssetIndex, DuplicateQuery, DuplicateResolver, HttpAssetIndex, DEFAULT_RESOLVE_TIMEOUT,
};
pub use fingerprint::{
    sha256_hex, FingerprintOutcome, Fingerprinter, DEFAULT_HASH_CEILING_BYTES,
};
pub use manager::{AssetLifecycle, PipelineContext, RunOutcome, UploadError};
pub use models::{
    DuplicateCandidate, DuplicateDecision, EventSink, MatchBasis, MediaMetadata, PendingAsset,
    PipelineEvent, PreviewHandle, UploadState,
};
pub use staging::{sanitize_filename, StagingArea, StagingError};
pub use transport::{
    ChunkRetryPolicy, ProgressFn, SizeTier, TransferOutcome, TransportError, UploadMetadata,
    Uploader, DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_HARD_CEILING_BYTES,
    DEFAULT_MAX_CONCURRENT_LARGE_TRANSFERS, DEFAULT_SMALL_TIER_LIMIT_BYTES,
};

#[cfg(feature = "mock")]
pub use compressor::MockVideoEncoder;
#[cfg(feature = "mock")]
pub use dedup::MockAssetIndex;
