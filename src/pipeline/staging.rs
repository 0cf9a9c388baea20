//! Local staging for in-flight uploads.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors that can occur while staging upload files.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

/// Supported image file extensions.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic", "avif"];

/// Supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];

/// Staging area managing per-upload temp directories.
pub struct StagingArea {
    /// Base directory for staged files.
    staging_dir: PathBuf,
}

impl StagingArea {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Initialize the staging area (creates the base directory).
    pub async fn init(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.staging_dir).await?;
        Ok(())
    }

    /// Create an upload-specific staging directory.
    pub async fn create_upload_dir(&self, upload_id: &str) -> Result<PathBuf, StagingError> {
        let dir = self.staging_dir.join(upload_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Stage raw bytes as the upload source file.
    pub async fn stage_source(
        &self,
        upload_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StagingError> {
        let safe_filename = sanitize_filename(filename)?;
        let dir = self.create_upload_dir(upload_id).await?;

        let path = dir.join(&safe_filename);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(path)
    }

    /// Create the transient preview file next to the staged source.
    ///
    /// A hard link when the filesystem allows it, a copy otherwise; either
    /// way the preview has its own directory entry so releasing it never
    /// touches the source.
    pub async fn create_preview(
        &self,
        upload_id: &str,
        source: &Path,
    ) -> Result<PathBuf, StagingError> {
        let dir = self.create_upload_dir(upload_id).await?;
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StagingError::InvalidFilename(format!("{:?}", source)))?;
        let preview_path = dir.join(format!("preview-{}", name));

        if fs::hard_link(source, &preview_path).await.is_err() {
            fs::copy(source, &preview_path).await?;
        }
        Ok(preview_path)
    }

    /// Output path for one compression pass.
    pub fn pass_output_path(&self, upload_id: &str, pass: usize) -> PathBuf {
        self.staging_dir
            .join(upload_id)
            .join(format!("pass-{}.mp4", pass))
    }

    /// Remove everything staged for an upload.
    pub async fn cleanup_upload(&self, upload_id: &str) -> Result<(), StagingError> {
        let dir = self.staging_dir.join(upload_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Check if a filename carries a supported image extension.
    pub fn is_supported_image(filename: &str) -> bool {
        has_extension_in(filename, IMAGE_EXTENSIONS)
    }

    /// Check if a filename carries a supported video extension.
    pub fn is_supported_video(filename: &str) -> bool {
        has_extension_in(filename, VIDEO_EXTENSIONS)
    }
}

fn has_extension_in(filename: &str, extensions: &[&str]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .map(|e| extensions.contains(&e.as_str()))
        .unwrap_or(false)
}

/// Sanitize a filename to prevent path traversal attacks.
pub fn sanitize_filename(filename: &str) -> Result<String, StagingError> {
    // Get just the filename part (no path)
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StagingError::InvalidFilename(filename.to_string()))?;

    // Null bytes never allowed; hidden files and exact ".." rejected
    if name.contains('\0') || name.starts_with('.') || name == ".." {
        return Err(StagingError::InvalidFilename(filename.to_string()));
    }

    // Replace problematic characters (keep Unicode letters/symbols)
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(StagingError::InvalidFilename(filename.to_string()));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(StagingArea::is_supported_image("photo.jpg"));
        assert!(StagingArea::is_supported_image("photo.PNG"));
        assert!(StagingArea::is_supported_image("scan.webp"));
        assert!(!StagingArea::is_supported_image("clip.mp4"));

        assert!(StagingArea::is_supported_video("clip.mp4"));
        assert!(StagingArea::is_supported_video("clip.MOV"));
        assert!(!StagingArea::is_supported_video("photo.jpg"));
        assert!(!StagingArea::is_supported_video("notes.txt"));
        assert!(!StagingArea::is_supported_video("clip"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip.mp4").unwrap(), "clip.mp4");
        // Path components are stripped, leaving just the filename
        assert_eq!(sanitize_filename("/path/to/clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_filename("../clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(
            sanitize_filename("kitchen:south.jpg").unwrap(),
            "kitchen_south.jpg"
        );

        assert!(sanitize_filename(".hidden").is_err());
        assert!(sanitize_filename("..").is_err());
    }

    #[tokio::test]
    async fn test_stage_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        staging.init().await.unwrap();

        let source = staging
            .stage_source("u1", "clip.mp4", b"video bytes")
            .await
            .unwrap();
        assert!(source.exists());

        let preview = staging.create_preview("u1", &source).await.unwrap();
        assert!(preview.exists());
        assert_ne!(preview, source);

        staging.cleanup_upload("u1").await.unwrap();
        assert!(!source.exists());
        assert!(!preview.exists());
    }
}
