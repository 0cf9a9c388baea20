//! Adaptive video compression through a descending quality ladder.
//!
//! Oversized video is re-encoded before it leaves the device. Each pass runs
//! one rung of the ladder; if the output is still over the target ceiling the
//! next pass re-encodes the *already-compressed* output at the next lower
//! rung, bounding total work to at most three passes. The codec itself is an
//! injected capability so the policy is testable without ffmpeg.

use super::staging::StagingArea;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transfer-friendly output target: matches the transport's single-request
/// body limit.
pub const DEFAULT_COMPRESS_TARGET_BYTES: u64 = 4 * 1024 * 1024;

/// Errors from the compression engine.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("encoder failed: {0}")]
    EncodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid encoder output: {0}")]
    InvalidOutput(String),

    #[error("cancelled")]
    Cancelled,
}

/// One rung of the quality ladder: output resolution cap, quality factor and
/// encoding speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRung {
    High,
    Medium,
    Low,
}

impl QualityRung {
    /// Longest-edge cap in pixels.
    pub fn max_dimension(&self) -> u32 {
        match self {
            Self::High => 1920,
            Self::Medium => 1280,
            Self::Low => 854,
        }
    }

    /// Constant-rate-factor style quality knob (higher = smaller/worse).
    pub fn crf(&self) -> u8 {
        match self {
            Self::High => 24,
            Self::Medium => 28,
            Self::Low => 32,
        }
    }

    /// Encoding speed preset.
    pub fn preset(&self) -> &'static str {
        match self {
            Self::High => "fast",
            Self::Medium => "faster",
            Self::Low => "veryfast",
        }
    }

    /// The next lower rung, or None at the floor.
    pub fn next_lower(&self) -> Option<QualityRung> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    /// Starting rung by input size tier. Larger inputs start lower to avoid
    /// wasted passes.
    pub fn starting_for_size(size_bytes: u64) -> QualityRung {
        const MIB: u64 = 1024 * 1024;
        if size_bytes > 30 * MIB {
            Self::Low
        } else if size_bytes > 15 * MIB {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Passes remaining from this rung down to the floor, inclusive.
    fn passes_to_floor(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

/// Intrinsic properties probed from a video file.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoInfo {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_ms: Option<i64>,
}

/// Injected compression engine. One call re-encodes input into a single
/// web-streamable container/codec pair at the given rung.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait::async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        rung: QualityRung,
    ) -> Result<(), CompressionError>;

    async fn probe(&self, input: &Path) -> Result<VideoInfo, CompressionError>;
}

/// Result of a compression run. `path` points at the bytes to upload, which
/// are the original when compression was skipped or fell back.
#[derive(Debug)]
pub struct CompressionOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub compressed: bool,
    pub passes: u8,
}

/// Drives the quality ladder over an injected encoder.
pub struct AdaptiveCompressor {
    encoder: Arc<dyn VideoEncoder>,
    target_bytes: u64,
}

impl AdaptiveCompressor {
    pub fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        Self {
            encoder,
            target_bytes: DEFAULT_COMPRESS_TARGET_BYTES,
        }
    }

    pub fn with_target_bytes(mut self, target_bytes: u64) -> Self {
        self.target_bytes = target_bytes;
        self
    }

    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    /// Compress a staged video down toward the target ceiling.
    ///
    /// No-op for inputs already at or under the target. Engine failures and a
    /// floor-rung output still over target both fall back to the original
    /// bytes; the transport's hard ceiling makes the final size decision.
    /// Progress is advisory and monotonic.
    pub async fn compress(
        &self,
        upload_id: &str,
        staging: &StagingArea,
        input: &Path,
        input_size: u64,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<CompressionOutcome, CompressionError> {
        if input_size <= self.target_bytes {
            progress(100);
            return Ok(CompressionOutcome {
                path: input.to_path_buf(),
                size_bytes: input_size,
                compressed: false,
                passes: 0,
            });
        }

        let mut rung = QualityRung::starting_for_size(input_size);
        let planned = rung.passes_to_floor();
        let mut current = input.to_path_buf();
        let mut current_size = input_size;
        let mut pass: u8 = 0;

        info!(
            "Compressing {} ({} bytes) starting at {:?}",
            upload_id, input_size, rung
        );

        loop {
            // Cancellation is best-effort between passes
            if cancel.is_cancelled() {
                return Err(CompressionError::Cancelled);
            }

            let output = staging.pass_output_path(upload_id, pass as usize);
            if let Err(e) = self.encoder.encode(&current, &output, rung).await {
                warn!(
                    "Encoder failed at {:?} on pass {}, falling back to original: {}",
                    rung, pass, e
                );
                progress(100);
                return Ok(CompressionOutcome {
                    path: input.to_path_buf(),
                    size_bytes: input_size,
                    compressed: false,
                    passes: pass,
                });
            }

            let output_size = tokio::fs::metadata(&output).await?.len();
            pass += 1;
            progress((pass as u32 * 100 / planned as u32).min(99) as u8);

            debug!(
                "Pass {} at {:?}: {} -> {} bytes",
                pass, rung, current_size, output_size
            );

            if output_size <= self.target_bytes {
                progress(100);
                return Ok(CompressionOutcome {
                    path: output,
                    size_bytes: output_size,
                    compressed: true,
                    passes: pass,
                });
            }

            match rung.next_lower() {
                Some(lower) => {
                    // Recurse on the already-compressed output, not the
                    // original, to bound total work
                    rung = lower;
                    current = output;
                    current_size = output_size;
                }
                None => {
                    warn!(
                        "Floor rung output still {} bytes (> {}), falling back to original",
                        output_size, self.target_bytes
                    );
                    progress(100);
                    return Ok(CompressionOutcome {
                        path: input.to_path_buf(),
                        size_bytes: input_size,
                        compressed: false,
                        passes: pass,
                    });
                }
            }
        }
    }
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<i32>,
    height: Option<i32>,
}

/// ffmpeg-backed encoder. Always re-encodes to H.264/AAC in a faststart MP4
/// so the output is web-streamable regardless of the input codec.
pub struct FfmpegEncoder;

impl FfmpegEncoder {
    /// Check that ffmpeg and ffprobe are on the PATH.
    pub async fn check_available() -> Result<(), CompressionError> {
        for tool in ["ffprobe", "ffmpeg"] {
            let status = Command::new(tool)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if status.map(|s| s.success()).unwrap_or(false) {
                continue;
            }
            return Err(CompressionError::EncodeFailed(format!(
                "{} not found or not working",
                tool
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        rung: QualityRung,
    ) -> Result<(), CompressionError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let scale = format!("scale='min({},iw)':-2", rung.max_dimension());
        let result = Command::new("ffmpeg")
            .args([
                "-i",
                input.to_str().unwrap_or(""),
                "-c:v",
                "libx264",
                "-preset",
                rung.preset(),
                "-crf",
                &rung.crf().to_string(),
                "-vf",
                &scale,
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
                "-y",
            ])
            .arg(output)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CompressionError::EncodeFailed(stderr.to_string()));
        }

        Ok(())
    }

    async fn probe(&self, input: &Path) -> Result<VideoInfo, CompressionError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompressionError::ProbeFailed(stderr.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe: FfprobeOutput = serde_json::from_str(&stdout)
            .map_err(|e| CompressionError::InvalidOutput(format!("JSON parse error: {}", e)))?;

        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

        let duration_ms = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0) as i64);

        Ok(VideoInfo {
            width: video_stream.and_then(|s| s.width),
            height: video_stream.and_then(|s| s.height),
            duration_ms,
        })
    }
}
