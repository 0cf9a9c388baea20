//! In-memory chunked upload sessions.
//!
//! A session spools chunks into a single file at their byte offsets. Chunk
//! writes are idempotent per index so a retried chunk never corrupts the
//! assembly, and out-of-order arrival is fine. Sessions idle past a TTL are
//! pruned together with their spool files.

use crate::server::messages::StartSessionRequest;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, info, warn};

/// Errors from the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("payload too large: {size_bytes} bytes (limit {limit_bytes})")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct ChunkSession {
    filename: String,
    kind: Option<String>,
    total_size: u64,
    total_chunks: u32,
    chunk_size: u64,
    width: Option<i32>,
    height: Option<i32>,
    duration_ms: Option<i64>,
    spool_path: PathBuf,
    received: Vec<bool>,
    last_activity: Instant,
}

impl ChunkSession {
    fn received_count(&self) -> u32 {
        self.received.iter().filter(|r| **r).count() as u32
    }

    fn expected_chunk_len(&self, index: u32) -> u64 {
        if index + 1 == self.total_chunks {
            self.total_size - index as u64 * self.chunk_size
        } else {
            self.chunk_size
        }
    }
}

/// A fully assembled session, ready to be persisted by the caller.
#[derive(Debug)]
pub struct CompletedSession {
    pub spool_path: PathBuf,
    pub filename: String,
    pub kind: Option<String>,
    pub total_size: u64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_ms: Option<i64>,
}

/// Result of accepting one chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks outstanding.
    Partial { received: u32, remaining: u32 },
    /// This chunk completed the set; the session has been retired.
    Complete(CompletedSession),
}

/// Manages the set of live chunked upload sessions.
pub struct UploadSessionManager {
    spool_dir: PathBuf,
    hard_ceiling_bytes: u64,
    sessions: Mutex<HashMap<String, ChunkSession>>,
}

impl UploadSessionManager {
    pub fn new(spool_dir: impl Into<PathBuf>, hard_ceiling_bytes: u64) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            hard_ceiling_bytes,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Open a new session. Validates sizes against the hard ceiling and the
    /// declared chunk arithmetic.
    pub async fn start(&self, request: &StartSessionRequest) -> Result<String, SessionError> {
        if request.total_size > self.hard_ceiling_bytes {
            return Err(SessionError::TooLarge {
                size_bytes: request.total_size,
                limit_bytes: self.hard_ceiling_bytes,
            });
        }
        if request.total_size == 0 || request.chunk_size == 0 || request.total_chunks == 0 {
            return Err(SessionError::InvalidSession(
                "total_size, chunk_size and total_chunks must be positive".into(),
            ));
        }
        let expected_chunks = request.total_size.div_ceil(request.chunk_size) as u32;
        if expected_chunks != request.total_chunks {
            return Err(SessionError::InvalidSession(format!(
                "{} chunks of {} bytes do not cover {} bytes",
                request.total_chunks, request.chunk_size, request.total_size
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let spool_path = self.spool_dir.join(format!("{}.part", session_id));

        // Preallocate the spool file so offset writes always land in bounds
        let file = tokio::fs::File::create(&spool_path).await?;
        file.set_len(request.total_size).await?;

        let session = ChunkSession {
            filename: request.filename.clone(),
            kind: request.kind.clone(),
            total_size: request.total_size,
            total_chunks: request.total_chunks,
            chunk_size: request.chunk_size,
            width: request.width,
            height: request.height,
            duration_ms: request.duration_ms,
            spool_path,
            received: vec![false; request.total_chunks as usize],
            last_activity: Instant::now(),
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        info!(
            "Opened upload session {} ({} chunks, {} bytes)",
            session_id,
            request.total_chunks,
            request.total_size
        );
        Ok(session_id)
    }

    /// Accept one chunk. The write is positioned, so repeats and reordering
    /// are harmless.
    pub async fn write_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: &[u8],
    ) -> Result<ChunkOutcome, SessionError> {
        // Validate against the session under the lock, but do the IO outside it
        let (spool_path, expected_len, offset) = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

            if index >= session.total_chunks {
                return Err(SessionError::InvalidChunk(format!(
                    "chunk index {} out of range (total {})",
                    index, session.total_chunks
                )));
            }
            session.last_activity = Instant::now();
            (
                session.spool_path.clone(),
                session.expected_chunk_len(index),
                index as u64 * session.chunk_size,
            )
        };

        if data.len() as u64 != expected_len {
            return Err(SessionError::InvalidChunk(format!(
                "chunk {} carries {} bytes, expected {}",
                index,
                data.len(),
                expected_len
            )));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&spool_path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.received[index as usize] = true;

        let received = session.received_count();
        let remaining = session.total_chunks - received;

        debug!(
            "Session {} chunk {} accepted ({}/{})",
            session_id,
            index,
            received,
            session.total_chunks
        );

        if remaining > 0 {
            return Ok(ChunkOutcome::Partial {
                received,
                remaining,
            });
        }

        // Complete: retire the session and hand the spool to the caller
        let session = sessions.remove(session_id).expect("session present");
        info!("Upload session {} complete", session_id);
        Ok(ChunkOutcome::Complete(CompletedSession {
            spool_path: session.spool_path,
            filename: session.filename,
            kind: session.kind,
            total_size: session.total_size,
            width: session.width,
            height: session.height,
            duration_ms: session.duration_ms,
        }))
    }

    /// Drop a session and its spool file.
    pub async fn abort(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if let Err(e) = tokio::fs::remove_file(&session.spool_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove spool {:?}: {}", session.spool_path, e);
            }
        }
        Ok(())
    }

    /// Remove sessions idle longer than `ttl`, deleting their spool files.
    /// Returns the number pruned.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let stale: Vec<(String, PathBuf)> = {
            let mut sessions = self.sessions.lock().unwrap();
            let stale_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.last_activity.elapsed() > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s.spool_path)))
                .collect()
        };

        for (id, spool_path) in &stale {
            info!("Pruning stale upload session {}", id);
            if let Err(e) = tokio::fs::remove_file(spool_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove spool {:?}: {}", spool_path, e);
                }
            }
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn start_request(total_size: u64, chunk_size: u64) -> StartSessionRequest {
        StartSessionRequest {
            filename: "clip.mp4".into(),
            kind: Some("video".into()),
            total_size,
            total_chunks: total_size.div_ceil(chunk_size) as u32,
            chunk_size,
            width: None,
            height: None,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn test_chunked_assembly_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let payload: Vec<u8> = (0..2500u32).flat_map(|i| i.to_le_bytes()).collect();
        let chunk_size = 4096u64;
        let id = manager
            .start(&start_request(payload.len() as u64, chunk_size))
            .await
            .unwrap();

        let chunks: Vec<&[u8]> = payload.chunks(chunk_size as usize).collect();
        let mut completed = None;
        for (index, chunk) in chunks.iter().enumerate() {
            match manager
                .write_chunk(&id, index as u32, chunk)
                .await
                .unwrap()
            {
                ChunkOutcome::Partial { received, .. } => {
                    assert_eq!(received, index as u32 + 1);
                }
                ChunkOutcome::Complete(done) => completed = Some(done),
            }
        }

        let done = completed.expect("final chunk completes the session");
        assert_eq!(done.total_size, payload.len() as u64);
        let assembled = std::fs::read(&done.spool_path).unwrap();
        assert_eq!(assembled, payload);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_and_repeated_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let payload = vec![7u8; 10_000];
        let id = manager
            .start(&start_request(10_000, 4096))
            .await
            .unwrap();

        // Last chunk first, middle repeated, then the rest
        let c0 = &payload[..4096];
        let c1 = &payload[4096..8192];
        let c2 = &payload[8192..];

        assert!(matches!(
            manager.write_chunk(&id, 2, c2).await.unwrap(),
            ChunkOutcome::Partial { received: 1, .. }
        ));
        assert!(matches!(
            manager.write_chunk(&id, 1, c1).await.unwrap(),
            ChunkOutcome::Partial { received: 2, .. }
        ));
        // Retransmit of an already-received chunk does not double-count
        assert!(matches!(
            manager.write_chunk(&id, 1, c1).await.unwrap(),
            ChunkOutcome::Partial { received: 2, .. }
        ));
        let done = match manager.write_chunk(&id, 0, c0).await.unwrap() {
            ChunkOutcome::Complete(done) => done,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(std::fs::read(&done.spool_path).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_over_ceiling_rejected_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 10 * MIB);
        manager.init().await.unwrap();

        let result = manager.start(&start_request(20 * MIB, 2 * MIB)).await;
        assert!(matches!(result, Err(SessionError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_bad_chunk_arithmetic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let mut request = start_request(10_000, 4096);
        request.total_chunks = 2; // should be 3
        assert!(matches!(
            manager.start(&request).await,
            Err(SessionError::InvalidSession(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_chunk_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let id = manager.start(&start_request(10_000, 4096)).await.unwrap();
        let result = manager.write_chunk(&id, 0, &[0u8; 100]).await;
        assert!(matches!(result, Err(SessionError::InvalidChunk(_))));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let result = manager.write_chunk("ghost", 0, &[0u8; 10]).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_prune_removes_stale_sessions_and_spools() {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadSessionManager::new(dir.path(), 100 * MIB);
        manager.init().await.unwrap();

        let id = manager.start(&start_request(10_000, 4096)).await.unwrap();
        let spool = dir.path().join(format!("{}.part", id));
        assert!(spool.exists());

        // Nothing stale yet
        assert_eq!(manager.prune_idle(Duration::from_secs(60)).await, 0);
        // Zero TTL makes everything stale
        assert_eq!(manager.prune_idle(Duration::ZERO).await, 1);
        assert!(!spool.exists());
        assert_eq!(manager.active_count(), 0);
    }
}
