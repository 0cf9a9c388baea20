//! Per-asset lifecycle orchestration.
//!
//! One `AssetLifecycle` instance owns one in-flight upload end to end:
//! staging, fingerprinting, duplicate check, the AwaitingDecision suspension,
//! conditional compression, transport, and guaranteed cleanup on every exit
//! path. Stages never overlap for the same asset; separate assets run as
//! independent instances sharing only the context's transfer pool.

use super::compressor::{AdaptiveCompressor, CompressionError, VideoEncoder};
use super::dedup::{AssetIndex, DuplicateQuery, DuplicateResolver};
use super::fingerprint::{Fingerprinter, FingerprintOutcome};
use super::models::{
    DuplicateCandidate, DuplicateDecision, EventSink, MediaMetadata, PendingAsset, PipelineEvent,
    PreviewHandle, UploadState,
};
use super::staging::{StagingArea, StagingError};
use super::transport::{TransportError, UploadMetadata, Uploader};
use crate::asset_store::{Asset, MediaKind};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors surfaced by the lifecycle. Soft failures (indeterminate
/// fingerprint, resolver unavailable, compression failure) are absorbed
/// internally and never appear here.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Transport(TransportError),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("invalid lifecycle state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("usage ledger update failed: {0}")]
    Ledger(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<TransportError> for UploadError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

/// Shared execution context for concurrent lifecycles.
///
/// The compression engine and transfer pool are reference-counted here
/// rather than living in module-level statics; they are initialized once and
/// torn down when the last in-flight asset drops its handle.
pub struct PipelineContext {
    pub staging: Arc<StagingArea>,
    pub fingerprinter: Fingerprinter,
    pub index: Arc<dyn AssetIndex>,
    pub encoder: Arc<dyn VideoEncoder>,
    pub uploader: Arc<Uploader>,
    pub dedup_timeout: std::time::Duration,
}

impl PipelineContext {
    pub fn new(
        staging: Arc<StagingArea>,
        index: Arc<dyn AssetIndex>,
        encoder: Arc<dyn VideoEncoder>,
        uploader: Arc<Uploader>,
    ) -> Self {
        Self {
            staging,
            fingerprinter: Fingerprinter::default(),
            index,
            encoder,
            uploader,
            dedup_timeout: super::dedup::DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

/// What `run()` produced: either a terminal asset, or a suspension awaiting
/// the caller's duplicate decision.
#[derive(Debug)]
pub enum RunOutcome {
    Persisted(Asset),
    AwaitingDecision(DuplicateCandidate),
}

/// Drives one asset through the pipeline state machine.
pub struct AssetLifecycle {
    ctx: Arc<PipelineContext>,
    pending: PendingAsset,
    state: UploadState,
    cancel: CancellationToken,
    events: Option<EventSink>,
    candidate: Option<DuplicateCandidate>,
    fingerprint: Option<String>,
    persisted: Option<Asset>,
}

impl AssetLifecycle {
    /// Stage raw bytes and build a lifecycle in `Idle`.
    ///
    /// The transient preview is created here, before any network activity,
    /// so the caller can render feedback immediately.
    pub async fn stage(
        ctx: Arc<PipelineContext>,
        filename: &str,
        data: &[u8],
        target: Option<crate::asset_store::UsageLocation>,
    ) -> Result<Self, UploadError> {
        let kind = if StagingArea::is_supported_image(filename) {
            MediaKind::Image
        } else if StagingArea::is_supported_video(filename) {
            MediaKind::Video
        } else {
            // Extension unknown; fall back to content sniffing
            infer::get(data)
                .and_then(|k| MediaKind::from_mime(k.mime_type()))
                .ok_or_else(|| UploadError::UnsupportedFileType(filename.to_string()))?
        };

        let upload_id = uuid::Uuid::new_v4().to_string();
        let staged_path = ctx.staging.stage_source(&upload_id, filename, data).await?;
        let preview_path = ctx.staging.create_preview(&upload_id, &staged_path).await?;

        debug!(
            "Staged upload {} ({:?}, {} bytes) with preview",
            upload_id,
            kind,
            data.len()
        );

        Ok(Self {
            ctx,
            pending: PendingAsset {
                upload_id,
                original_filename: filename.to_string(),
                kind,
                size_bytes: data.len() as u64,
                staged_path,
                preview: PreviewHandle::new(preview_path),
                metadata: MediaMetadata::default(),
                target,
            },
            state: UploadState::Idle,
            cancel: CancellationToken::new(),
            events: None,
            candidate: None,
            fingerprint: None,
            persisted: None,
        })
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn pending(&self) -> &PendingAsset {
        &self.pending
    }

    pub fn persisted(&self) -> Option<&Asset> {
        self.persisted.as_ref()
    }

    /// Token for aborting this lifecycle from another task.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel a suspended lifecycle (Idle or AwaitingDecision) synchronously:
    /// releases the preview, removes staged files, reaches `Cancelled`.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.finalize(UploadState::Cancelled);
        }
    }

    /// Advance from Idle until terminal or AwaitingDecision.
    pub async fn run(&mut self) -> Result<RunOutcome, UploadError> {
        if self.state != UploadState::Idle {
            return Err(UploadError::InvalidState {
                expected: UploadState::Idle.as_str(),
                actual: self.state.as_str(),
            });
        }

        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail_with(e)),
        }
    }

    async fn run_inner(&mut self) -> Result<RunOutcome, UploadError> {
        self.set_state(UploadState::Fingerprinting);
        let fingerprint = self.compute_fingerprint().await?;
        self.fingerprint = fingerprint.digest().map(|d| d.to_string());

        self.set_state(UploadState::CheckingDuplicates);
        let query = match &fingerprint {
            FingerprintOutcome::Digest(digest) => DuplicateQuery::Digest(digest.clone()),
            FingerprintOutcome::Indeterminate => {
                DuplicateQuery::Filename(self.pending.original_filename.clone())
            }
        };

        let resolver =
            DuplicateResolver::new(self.ctx.index.clone()).with_timeout(self.ctx.dedup_timeout);
        let candidate = self
            .checked(resolver.resolve(&query))
            .await?;

        if let Some(candidate) = candidate {
            info!(
                "Upload {} matched existing asset {} by {:?}; awaiting decision",
                self.pending.upload_id, candidate.asset.id, candidate.basis
            );
            self.candidate = Some(candidate.clone());
            self.set_state(UploadState::AwaitingDecision);
            return Ok(RunOutcome::AwaitingDecision(candidate));
        }

        let asset = self.compress_and_upload().await?;
        Ok(RunOutcome::Persisted(asset))
    }

    /// Resume a lifecycle suspended in AwaitingDecision.
    pub async fn resolve_decision(
        &mut self,
        decision: DuplicateDecision,
    ) -> Result<Asset, UploadError> {
        if self.state != UploadState::AwaitingDecision {
            return Err(UploadError::InvalidState {
                expected: UploadState::AwaitingDecision.as_str(),
                actual: self.state.as_str(),
            });
        }

        match decision {
            DuplicateDecision::UseExisting => {
                let candidate = self.candidate.take().expect("candidate set in AwaitingDecision");
                match self.reuse_existing(candidate).await {
                    Ok(asset) => Ok(asset),
                    Err(e) => Err(self.fail_with(e)),
                }
            }
            DuplicateDecision::UploadAnyway => {
                // Dedup already ran; do not re-check for this asset
                self.candidate = None;
                match self.compress_and_upload().await {
                    Ok(asset) => Ok(asset),
                    Err(e) => Err(self.fail_with(e)),
                }
            }
        }
    }

    /// Reuse path: no upload; the ledger increment and the reuse decision are
    /// one server-side transaction.
    async fn reuse_existing(
        &mut self,
        candidate: DuplicateCandidate,
    ) -> Result<Asset, UploadError> {
        if let Some(target) = self.pending.target.clone() {
            self.checked(async {
                self.ctx
                    .index
                    .attach_usage(&candidate.asset.id, &target)
                    .await
            })
            .await?
            .map_err(|e| UploadError::Ledger(e.to_string()))?;
        }

        info!(
            "Upload {} reusing existing asset {}",
            self.pending.upload_id, candidate.asset.id
        );
        self.persisted = Some(candidate.asset.clone());
        self.finalize(UploadState::Persisted);
        Ok(candidate.asset)
    }

    async fn compress_and_upload(&mut self) -> Result<Asset, UploadError> {
        let (payload_path, payload_size) = self.maybe_compress().await?;

        self.set_state(UploadState::Uploading);
        let meta = UploadMetadata {
            filename: self.pending.original_filename.clone(),
            kind: Some(self.pending.kind.as_str().to_string()),
            fingerprint: self.fingerprint.clone(),
            width: self.pending.metadata.width,
            height: self.pending.metadata.height,
            duration_ms: self.pending.metadata.duration_ms,
        };

        let progress = self.progress_sink(UploadState::Uploading);
        let outcome = self
            .ctx
            .uploader
            .upload(&payload_path, payload_size, &meta, &self.cancel, progress)
            .await?;

        if outcome.deduplicated {
            info!(
                "Upload {} resolved server-side to existing asset {}",
                self.pending.upload_id, outcome.asset.id
            );
        }

        if let Some(target) = self.pending.target.clone() {
            self.ctx
                .index
                .attach_usage(&outcome.asset.id, &target)
                .await
                .map_err(|e| UploadError::Ledger(e.to_string()))?;
        }

        self.persisted = Some(outcome.asset.clone());
        self.finalize(UploadState::Persisted);
        Ok(outcome.asset)
    }

    /// Compress oversized video; images and small videos pass through
    /// without entering the Compressing state.
    async fn maybe_compress(
        &mut self,
    ) -> Result<(std::path::PathBuf, u64), UploadError> {
        let compressor = AdaptiveCompressor::new(self.ctx.encoder.clone())
            .with_target_bytes(self.ctx.uploader.small_tier_limit());

        if self.pending.kind != MediaKind::Video
            || self.pending.size_bytes <= compressor.target_bytes()
        {
            return Ok((self.pending.staged_path.clone(), self.pending.size_bytes));
        }

        self.set_state(UploadState::Compressing);

        // Probe intrinsic metadata while we have the engine at hand
        if let Ok(info) = self.ctx.encoder.probe(&self.pending.staged_path).await {
            self.pending.metadata = MediaMetadata {
                width: info.width,
                height: info.height,
                duration_ms: info.duration_ms,
            };
        }

        let progress = self.progress_sink(UploadState::Compressing);
        let result = self
            .checked(compressor.compress(
                &self.pending.upload_id,
                &self.ctx.staging,
                &self.pending.staged_path,
                self.pending.size_bytes,
                &self.cancel,
                progress.as_ref(),
            ))
            .await?;

        match result {
            Ok(outcome) => Ok((outcome.path, outcome.size_bytes)),
            Err(CompressionError::Cancelled) => Err(UploadError::Cancelled),
            Err(e) => {
                // Compression is never a hard dependency
                warn!(
                    "Compression of {} failed, uploading original bytes: {}",
                    self.pending.upload_id, e
                );
                Ok((self.pending.staged_path.clone(), self.pending.size_bytes))
            }
        }
    }

    async fn compute_fingerprint(&mut self) -> Result<FingerprintOutcome, UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        // Skip the read entirely when the file is over the hashing ceiling
        let outcome = if self.pending.size_bytes > self.ctx.fingerprinter.hash_ceiling_bytes() {
            FingerprintOutcome::Indeterminate
        } else {
            match tokio::fs::read(&self.pending.staged_path).await {
                Ok(data) => {
                    let fingerprinter = self.ctx.fingerprinter.clone();
                    // CPU-bound; keep it off the interaction-critical path
                    match tokio::task::spawn_blocking(move || fingerprinter.fingerprint(&data))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("Fingerprint task failed ({}), dedup degraded", e);
                            FingerprintOutcome::Indeterminate
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not read staged file for hashing ({}), dedup degraded",
                        e
                    );
                    FingerprintOutcome::Indeterminate
                }
            }
        };

        // Hashing cannot be interrupted mid-digest; honor a cancel that
        // arrived while it ran
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(outcome)
    }

    /// Race a stage future against cancellation.
    async fn checked<F, T>(&self, fut: F) -> Result<T, UploadError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            value = fut => Ok(value),
        }
    }

    fn progress_sink(&self, stage: UploadState) -> super::transport::ProgressFn {
        match &self.events {
            Some(events) => {
                let events = events.clone();
                Arc::new(move |percent| {
                    events(PipelineEvent::Progress { stage, percent });
                })
            }
            None => Arc::new(|_| {}),
        }
    }

    fn set_state(&mut self, state: UploadState) {
        debug!(
            "Upload {}: {} -> {}",
            self.pending.upload_id,
            self.state.as_str(),
            state.as_str()
        );
        self.state = state;
        if let Some(events) = &self.events {
            events(PipelineEvent::StateChanged(state));
        }
    }

    /// Map an error to its terminal state, clean up, and pass it through.
    fn fail_with(&mut self, error: UploadError) -> UploadError {
        let terminal = match error {
            UploadError::Cancelled => UploadState::Cancelled,
            _ => UploadState::Failed,
        };
        self.finalize(terminal);
        error
    }

    /// Enter a terminal state, releasing the preview and removing staged
    /// files. The preview release is synchronous; staged files of a
    /// persisted upload are gone by the time this returns control.
    fn finalize(&mut self, terminal: UploadState) {
        self.pending.preview.release();

        let upload_dir = self
            .ctx
            .staging
            .staging_dir()
            .join(&self.pending.upload_id);
        if upload_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&upload_dir) {
                warn!("Failed to clean staging dir {:?}: {}", upload_dir, e);
            }
        }

        self.set_state(terminal);
    }
}

impl Drop for AssetLifecycle {
    fn drop(&mut self) {
        // Owner teardown counts as cancellation: no dangling local resources
        if !self.state.is_terminal() {
            self.cancel.cancel();
            self.finalize(UploadState::Cancelled);
        }
    }
}
