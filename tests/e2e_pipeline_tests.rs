//! End-to-end tests driving the full client pipeline against a live server.

mod common;

use common::{
    image_bytes, video_bytes, ShrinkingEncoder, TestClient, TestServer, MIB, PROPERTY_1_ID,
    STEP_CHECKIN_ID, ZONE_KITCHEN_ID,
};
use dimora_media_server::asset_store::{AssetStore, UsageLocation};
use dimora_media_server::pipeline::{
    AssetLifecycle, DuplicateDecision, HttpAssetIndex, MatchBasis, PipelineContext, RunOutcome,
    StagingArea, TransportError, UploadError, UploadState, Uploader, VideoEncoder,
};
use std::sync::Arc;
use tempfile::TempDir;

fn make_ctx(
    server: &TestServer,
    staging_root: &TempDir,
    encoder: Arc<dyn VideoEncoder>,
    uploader: Uploader,
) -> Arc<PipelineContext> {
    Arc::new(PipelineContext::new(
        Arc::new(StagingArea::new(staging_root.path())),
        Arc::new(HttpAssetIndex::new(server.base_url.clone())),
        encoder,
        Arc::new(uploader),
    ))
}

fn default_ctx(server: &TestServer, staging_root: &TempDir) -> Arc<PipelineContext> {
    make_ctx(
        server,
        staging_root,
        Arc::new(ShrinkingEncoder::new(0.5)),
        Uploader::new(server.base_url.clone()),
    )
}

fn target() -> UsageLocation {
    UsageLocation {
        property_id: PROPERTY_1_ID.into(),
        zone_id: ZONE_KITCHEN_ID.into(),
        step_id: STEP_CHECKIN_ID.into(),
    }
}

#[tokio::test]
async fn test_photo_persists_through_small_tier() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();
    let ctx = default_ctx(&server, &staging);

    let mut lifecycle = AssetLifecycle::stage(ctx, "hall.jpg", &image_bytes(1, 256 * 1024), None)
        .await
        .unwrap();

    let asset = match lifecycle.run().await.unwrap() {
        RunOutcome::Persisted(asset) => asset,
        RunOutcome::AwaitingDecision(_) => panic!("fresh content must not match"),
    };

    assert_eq!(lifecycle.state(), UploadState::Persisted);
    assert_eq!(asset.size_bytes, 256 * 1024_i64);
    assert!(lifecycle.pending().preview.is_released());

    // The server really has it
    let client = TestClient::new(server.base_url.clone());
    let stored = client.get_media(&asset.id).await;
    assert_eq!(stored.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_second_identical_upload_suspends_and_reuses() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();
    let payload = image_bytes(2, 64 * 1024);

    let first_asset = {
        let ctx = default_ctx(&server, &staging);
        let mut lifecycle = AssetLifecycle::stage(ctx, "sofa.jpg", &payload, None)
            .await
            .unwrap();
        match lifecycle.run().await.unwrap() {
            RunOutcome::Persisted(asset) => asset,
            RunOutcome::AwaitingDecision(_) => panic!("first upload must not match"),
        }
    };

    // Byte-identical content under another name: the digest finds it
    let ctx = default_ctx(&server, &staging);
    let mut lifecycle = AssetLifecycle::stage(ctx, "sofa-copy.jpg", &payload, Some(target()))
        .await
        .unwrap();

    let candidate = match lifecycle.run().await.unwrap() {
        RunOutcome::AwaitingDecision(candidate) => candidate,
        RunOutcome::Persisted(_) => panic!("identical content must suspend for a decision"),
    };
    assert_eq!(candidate.asset.id, first_asset.id);
    assert_eq!(candidate.basis, MatchBasis::Fingerprint);
    assert!(!candidate.requires_confirmation());

    // Reuse: no new asset row, usage incremented by exactly one
    let reused = lifecycle
        .resolve_decision(DuplicateDecision::UseExisting)
        .await
        .unwrap();
    assert_eq!(reused.id, first_asset.id);
    assert_eq!(lifecycle.state(), UploadState::Persisted);

    let (asset_count, _) = server.asset_store.stats().unwrap();
    assert_eq!(asset_count, 1);
    let stored = server.asset_store.get_asset(&first_asset.id).unwrap().unwrap();
    assert_eq!(stored.usage_count, 1);
    assert_eq!(server.asset_store.usage_locations(&first_asset.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_anyway_lands_on_server_side_dedup() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();
    let payload = image_bytes(3, 64 * 1024);

    let first_asset = {
        let ctx = default_ctx(&server, &staging);
        let mut lifecycle = AssetLifecycle::stage(ctx, "door.jpg", &payload, None)
            .await
            .unwrap();
        match lifecycle.run().await.unwrap() {
            RunOutcome::Persisted(asset) => asset,
            RunOutcome::AwaitingDecision(_) => panic!("first upload must not match"),
        }
    };

    let ctx = default_ctx(&server, &staging);
    let mut lifecycle = AssetLifecycle::stage(ctx, "door.jpg", &payload, None)
        .await
        .unwrap();
    match lifecycle.run().await.unwrap() {
        RunOutcome::AwaitingDecision(_) => {}
        RunOutcome::Persisted(_) => panic!("identical content must suspend"),
    }

    // The caller insists; the server's own check still collapses it
    let asset = lifecycle
        .resolve_decision(DuplicateDecision::UploadAnyway)
        .await
        .unwrap();
    assert_eq!(asset.id, first_asset.id);

    let (asset_count, _) = server.asset_store.stats().unwrap();
    assert_eq!(asset_count, 1);
}

#[tokio::test]
async fn test_oversized_video_compresses_then_uploads_small_tier() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();

    // 45 MiB vertical video; over the 20 MiB hashing ceiling, over the
    // 30 MiB compression tier, so: Indeterminate fingerprint, no filename
    // match, ladder starts at the low rung
    let payload = video_bytes(4, 45 * MIB);
    let ctx = make_ctx(
        &server,
        &staging,
        Arc::new(ShrinkingEncoder::new(0.08)), // one pass lands near 3.6 MiB
        Uploader::new(server.base_url.clone()),
    );

    let mut lifecycle = AssetLifecycle::stage(ctx, "tour-vertical.mp4", &payload, None)
        .await
        .unwrap();

    let asset = match lifecycle.run().await.unwrap() {
        RunOutcome::Persisted(asset) => asset,
        RunOutcome::AwaitingDecision(_) => panic!("nothing to match against"),
    };

    assert_eq!(lifecycle.state(), UploadState::Persisted);
    assert_eq!(asset.kind, dimora_media_server::asset_store::MediaKind::Video);
    // Compressed output fits the single-request tier
    assert!(asset.size_bytes <= 4 * MIB as i64);
    assert!(asset.size_bytes > 0);
    // Probed metadata rode along with the upload
    assert_eq!(asset.width, Some(1080));
    assert_eq!(asset.height, Some(1920));
    assert_eq!(asset.duration_ms, Some(32_000));
}

#[tokio::test]
async fn test_compression_failure_falls_back_to_chunked_original() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();

    // 9 MiB video and a broken engine: the original bytes go up chunked
    let payload = video_bytes(5, 9 * MIB);
    let ctx = make_ctx(
        &server,
        &staging,
        Arc::new(ShrinkingEncoder::failing()),
        Uploader::new(server.base_url.clone()),
    );

    let mut lifecycle = AssetLifecycle::stage(ctx, "fallback.mp4", &payload, None)
        .await
        .unwrap();

    let asset = match lifecycle.run().await.unwrap() {
        RunOutcome::Persisted(asset) => asset,
        RunOutcome::AwaitingDecision(_) => panic!("nothing to match against"),
    };

    assert_eq!(asset.size_bytes, payload.len() as i64);

    // Byte-exact after reassembly on the server
    let client = TestClient::new(server.base_url.clone());
    let served = client.get_media_file(&asset.id).await.bytes().await.unwrap();
    assert_eq!(served.as_ref(), &payload[..]);
}

#[tokio::test]
async fn test_hard_ceiling_surfaces_payload_too_large() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();

    // Client-side ceiling of 8 MiB; compression cannot help (engine broken)
    let payload = video_bytes(6, 9 * MIB);
    let ctx = make_ctx(
        &server,
        &staging,
        Arc::new(ShrinkingEncoder::failing()),
        Uploader::new(server.base_url.clone()).with_limits(4 * MIB as u64, 8 * MIB as u64),
    );

    let mut lifecycle = AssetLifecycle::stage(ctx, "too-big.mp4", &payload, None)
        .await
        .unwrap();

    let error = lifecycle.run().await.unwrap_err();
    match error {
        UploadError::Transport(TransportError::PayloadTooLarge {
            size_bytes,
            limit_bytes,
        }) => {
            assert_eq!(size_bytes, payload.len() as u64);
            assert_eq!(limit_bytes, 8 * MIB as u64);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }

    assert_eq!(lifecycle.state(), UploadState::Failed);
    assert!(lifecycle.pending().preview.is_released());

    // The index was never touched
    let (asset_count, _) = server.asset_store.stats().unwrap();
    assert_eq!(asset_count, 0);
}

#[tokio::test]
async fn test_filename_match_requires_explicit_confirmation() {
    let server = TestServer::spawn().await;
    let staging = TempDir::new().unwrap();

    // Both payloads are over the 20 MiB hashing ceiling, so dedup falls back
    // to the filename heuristic; the contents differ
    let first_payload = video_bytes(7, 21 * MIB);
    let second_payload = video_bytes(8, 22 * MIB);

    {
        let ctx = make_ctx(
            &server,
            &staging,
            Arc::new(ShrinkingEncoder::failing()),
            Uploader::new(server.base_url.clone()),
        );
        let mut lifecycle = AssetLifecycle::stage(ctx, "walkthrough.mp4", &first_payload, None)
            .await
            .unwrap();
        match lifecycle.run().await.unwrap() {
            RunOutcome::Persisted(_) => {}
            RunOutcome::AwaitingDecision(_) => panic!("first upload must not match"),
        }
    }

    let ctx = make_ctx(
        &server,
        &staging,
        Arc::new(ShrinkingEncoder::failing()),
        Uploader::new(server.base_url.clone()),
    );
    let mut lifecycle = AssetLifecycle::stage(ctx, "walkthrough.mp4", &second_payload, None)
        .await
        .unwrap();

    let candidate = match lifecycle.run().await.unwrap() {
        RunOutcome::AwaitingDecision(candidate) => candidate,
        RunOutcome::Persisted(_) => panic!("same filename must suspend for confirmation"),
    };
    assert_eq!(candidate.basis, MatchBasis::Filename);
    assert!(candidate.requires_confirmation());

    // Different bytes, so uploading anyway creates a second asset
    let asset = lifecycle
        .resolve_decision(DuplicateDecision::UploadAnyway)
        .await
        .unwrap();
    assert_eq!(asset.size_bytes, second_payload.len() as i64);

    let (asset_count, _) = server.asset_store.stats().unwrap();
    assert_eq!(asset_count, 2);
}
