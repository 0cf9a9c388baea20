//! Test fixture payloads and stub engines
//!
//! Payloads are generated rather than stored: a deterministic PRNG body
//! behind a real magic-number header, so content sniffing sees the right
//! media kind and different seeds never collide on a digest.

use dimora_media_server::pipeline::{CompressionError, QualityRung, VideoEncoder, VideoInfo};
use std::path::Path;

/// Deterministic bytes from a seed (xorshift)
fn pseudo_random_body(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// A payload that sniffs as image/jpeg
pub fn image_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    bytes.extend(pseudo_random_body(seed, len.saturating_sub(bytes.len())));
    bytes
}

/// A payload that sniffs as video/mp4 (ftyp box header)
pub fn video_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(b"\x00\x00\x02\x00isomiso2mp41");
    bytes.extend(pseudo_random_body(seed, len.saturating_sub(bytes.len())));
    bytes
}

/// Stub compression engine: each pass shrinks the input by a fixed ratio and
/// keeps an mp4 header on the output so sniffing still sees video.
pub struct ShrinkingEncoder {
    pub ratio: f64,
    pub fail: bool,
}

impl ShrinkingEncoder {
    pub fn new(ratio: f64) -> Self {
        Self { ratio, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            ratio: 1.0,
            fail: true,
        }
    }
}

#[async_trait::async_trait]
impl VideoEncoder for ShrinkingEncoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        _rung: QualityRung,
    ) -> Result<(), CompressionError> {
        if self.fail {
            return Err(CompressionError::EncodeFailed("stub engine failure".into()));
        }
        let input_len = std::fs::metadata(input)?.len() as usize;
        let output_len = (input_len as f64 * self.ratio) as usize;
        std::fs::write(output, video_bytes(0xC0DEC, output_len))?;
        Ok(())
    }

    async fn probe(&self, _input: &Path) -> Result<VideoInfo, CompressionError> {
        Ok(VideoInfo {
            width: Some(1080),
            height: Some(1920),
            duration_ms: Some(32_000),
        })
    }
}
