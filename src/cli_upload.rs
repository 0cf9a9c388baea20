//! Command-line uploader: drives the full ingestion pipeline against a
//! running media server.
//!
//! Each file runs as its own lifecycle instance; a batch runs them
//! concurrently through a shared transfer pool.

use anyhow::{Context, Result};
use clap::Parser;
use dimora_media_server::asset_store::UsageLocation;
use dimora_media_server::pipeline::{
    AssetLifecycle, DuplicateDecision, FfmpegEncoder, HttpAssetIndex, PipelineContext,
    PipelineEvent, RunOutcome, StagingArea, UploadState, Uploader,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Base URL of the media server.
    #[clap(long, default_value = "http://127.0.0.1:3001")]
    pub server: String,

    /// Files to upload.
    #[clap(required = true)]
    pub files: Vec<PathBuf>,

    /// Property to attach the uploaded assets to.
    #[clap(long)]
    pub property: Option<String>,

    /// Zone within the property.
    #[clap(long)]
    pub zone: Option<String>,

    /// Step within the zone.
    #[clap(long)]
    pub step: Option<String>,

    /// Reuse existing assets on exact content matches without asking.
    #[clap(long)]
    pub reuse_duplicates: bool,

    /// Upload even when a duplicate candidate exists.
    #[clap(long)]
    pub force_upload: bool,
}

fn target_from_args(args: &CliArgs) -> Option<UsageLocation> {
    match (&args.property, &args.zone, &args.step) {
        (Some(property_id), Some(zone_id), Some(step_id)) => Some(UsageLocation {
            property_id: property_id.clone(),
            zone_id: zone_id.clone(),
            step_id: step_id.clone(),
        }),
        _ => None,
    }
}

async fn upload_one(
    ctx: Arc<PipelineContext>,
    path: PathBuf,
    target: Option<UsageLocation>,
    reuse_duplicates: bool,
    force_upload: bool,
    bar: ProgressBar,
) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Invalid file name")?
        .to_string();
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;

    bar.set_message(format!("{}: staging", filename));

    let events_bar = bar.clone();
    let events_name = filename.clone();
    let mut lifecycle = AssetLifecycle::stage(ctx, &filename, &data, target)
        .await?
        .with_events(Arc::new(move |event| match event {
            PipelineEvent::StateChanged(state) => {
                events_bar.set_message(format!("{}: {}", events_name, state.as_str().to_lowercase()));
            }
            PipelineEvent::Progress { percent, .. } => {
                events_bar.set_position(percent as u64);
            }
        }));

    let asset = match lifecycle.run().await? {
        RunOutcome::Persisted(asset) => asset,
        RunOutcome::AwaitingDecision(candidate) => {
            let auto_reuse = reuse_duplicates && !candidate.requires_confirmation();
            if auto_reuse {
                lifecycle
                    .resolve_decision(DuplicateDecision::UseExisting)
                    .await?
            } else if force_upload {
                lifecycle
                    .resolve_decision(DuplicateDecision::UploadAnyway)
                    .await?
            } else {
                bar.abandon_with_message(format!(
                    "{}: duplicate of {} ({} usages, matched by {:?}) - rerun with \
                     --reuse-duplicates or --force-upload",
                    filename,
                    candidate.asset.id,
                    candidate.locations.len(),
                    candidate.basis
                ));
                lifecycle.cancel();
                return Ok(());
            }
        }
    };

    debug_assert_eq!(lifecycle.state(), UploadState::Persisted);
    bar.finish_with_message(format!("{}: {}", filename, asset.url));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    if FfmpegEncoder::check_available().await.is_err() {
        eprintln!("warning: ffmpeg not found; oversized video will upload uncompressed");
    }

    let staging = Arc::new(StagingArea::new(
        std::env::temp_dir().join("dimora-media-upload"),
    ));
    staging.init().await?;

    let ctx = Arc::new(PipelineContext::new(
        staging,
        Arc::new(HttpAssetIndex::new(args.server.clone())),
        Arc::new(FfmpegEncoder),
        Arc::new(Uploader::new(args.server.clone())),
    ));

    let progress = MultiProgress::new();
    let style = ProgressStyle::with_template("{bar:30} {pos:>3}% {msg}")
        .expect("valid progress template");

    let target = target_from_args(&args);
    let mut tasks = Vec::with_capacity(args.files.len());
    for file in args.files {
        let bar = progress.add(ProgressBar::new(100).with_style(style.clone()));
        tasks.push(tokio::spawn(upload_one(
            ctx.clone(),
            file,
            target.clone(),
            args.reuse_duplicates,
            args.force_upload,
            bar,
        )));
    }

    let mut failures = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                eprintln!("upload failed: {:#}", e);
            }
            Err(e) => {
                failures += 1;
                eprintln!("upload task panicked: {}", e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} upload(s) failed", failures);
    }
    Ok(())
}
