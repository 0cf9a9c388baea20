//! Data models for the client-side ingestion pipeline.
//!
//! Pipeline workflow per asset:
//! 1. Caller submits raw bytes + metadata → PendingAsset staged locally
//! 2. Fingerprinting: SHA-256 digest when the payload is small enough
//! 3. Duplicate check against the server asset index
//! 4. AwaitingDecision (if a candidate was found): reuse or upload anyway
//! 5. Compressing (oversized video only)
//! 6. Uploading through the selected transport
//! 7. Persisted: the transient preview is swapped for the durable URL

use crate::asset_store::{Asset, MediaKind, UsageLocation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// State of an in-flight upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    /// Created, nothing started yet.
    Idle,
    /// Computing the content digest.
    Fingerprinting,
    /// Querying the asset index for an existing copy.
    CheckingDuplicates,
    /// A candidate was found; suspended until the caller decides.
    AwaitingDecision,
    /// Re-encoding oversized video.
    Compressing,
    /// Transferring bytes to the server.
    Uploading,
    /// Terminal: a durable asset exists (new or reused).
    Persisted,
    /// Terminal: this attempt failed.
    Failed,
    /// Terminal: cancelled by the caller or owner teardown.
    Cancelled,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Fingerprinting => "FINGERPRINTING",
            Self::CheckingDuplicates => "CHECKING_DUPLICATES",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::Compressing => "COMPRESSING",
            Self::Uploading => "UPLOADING",
            Self::Persisted => "PERSISTED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed | Self::Cancelled)
    }
}

/// How a duplicate candidate was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchBasis {
    /// Exact content digest match. No false positives.
    Fingerprint,
    /// Exact original-filename match. Heuristic; collisions are possible,
    /// so the caller must confirm before reusing.
    Filename,
}

impl MatchBasis {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Filename)
    }
}

/// An existing asset that matches the pending upload, plus everywhere it is
/// currently used, so the caller can render an informed reuse choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub asset: Asset,
    pub locations: Vec<UsageLocation>,
    pub basis: MatchBasis,
}

impl DuplicateCandidate {
    pub fn requires_confirmation(&self) -> bool {
        self.basis.requires_confirmation()
    }
}

/// Caller decision on a duplicate candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    /// Reuse the existing asset; no upload, ledger incremented.
    UseExisting,
    /// Proceed with a normal upload, skipping further dedup for this asset.
    UploadAnyway,
}

/// Intrinsic metadata probed from the source file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_ms: Option<i64>,
}

/// Transient local preview reference for an in-flight upload.
///
/// Owned exclusively by one lifecycle instance. Released explicitly on every
/// terminal state; the path is unreadable after release.
#[derive(Debug)]
pub struct PreviewHandle {
    path: PathBuf,
    released: bool,
}

impl PreviewHandle {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    /// The preview file path, or None once released.
    pub fn path(&self) -> Option<&Path> {
        if self.released {
            None
        } else {
            Some(&self.path)
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the preview synchronously, removing the backing file.
    ///
    /// Safe to call more than once; only the first call touches the
    /// filesystem.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove preview file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Transient client-side representation of an in-flight upload.
#[derive(Debug)]
pub struct PendingAsset {
    /// Upload identifier (names the staging directory).
    pub upload_id: String,
    /// Filename as supplied by the caller.
    pub original_filename: String,
    /// Detected media kind.
    pub kind: MediaKind,
    /// Size of the staged source in bytes.
    pub size_bytes: u64,
    /// Staged source file.
    pub staged_path: PathBuf,
    /// Transient local preview.
    pub preview: PreviewHandle,
    /// Probed intrinsic metadata.
    pub metadata: MediaMetadata,
    /// Target location to attach on persist, when the caller supplied one.
    pub target: Option<UsageLocation>,
}

/// Events emitted by the pipeline. Advisory only; never used for
/// synchronization.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(UploadState),
    /// Monotonic progress within the named stage, 0..=100.
    Progress { stage: UploadState, percent: u8 },
}

/// Callback receiving pipeline events. May fire from a different task than
/// the one that started the upload.
pub type EventSink = std::sync::Arc<dyn Fn(PipelineEvent) + Send + Sync>;
