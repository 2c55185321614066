//! camlapse - CCTV frame capture and timelapse summarizer
//!
//! Main entry point: CLI parsing, config load, service composition.

use anyhow::Context;
use camlapse::{
    assembler::VideoAssembler,
    camera_status::CameraStatusTracker,
    capture::{Capture, FfmpegCapture},
    config::AppConfig,
    diagnostics::Diagnostics,
    encoder::FfmpegEncoder,
    frame_store::FrameStore,
    manifest::ManifestPublisher,
    retention::RetentionManager,
    scheduler::{self, CaptureScheduler},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "camlapse", about = "Capture and summarize network camera feeds", version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full capture/assembly/retention pipeline (default)
    Run,
    /// Generate one video per enabled camera, then exit
    GenerateVideos,
    /// Try a single capture from one camera and report the result
    TestCapture {
        /// Camera id from the config
        camera: String,
    },
    /// Replay motion decisions over stored frames (read-only)
    TestChanges {
        /// Camera id; all configured cameras when omitted
        camera: Option<String>,
        /// First frame index of the range (inclusive)
        #[arg(long)]
        from: Option<usize>,
        /// End frame index of the range (exclusive)
        #[arg(long)]
        to: Option<usize>,
        /// Write diff/mask/contour images per pair under {output}/debug
        #[arg(long)]
        debug_images: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // Initialize tracing; RUST_LOG wins over the configured log_level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("camlapse={}", config.settings.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camlapse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = %cli.config.display(),
        output_path = %config.settings.output_path.display(),
        cameras = config.cameras.len(),
        enabled = config.enabled_cameras().count(),
        "Configuration loaded"
    );

    let config = Arc::new(config);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::GenerateVideos => generate_videos(config, store).await,
        Command::TestCapture { camera } => test_capture(config, store, &camera).await,
        Command::TestChanges {
            camera,
            from,
            to,
            debug_images,
        } => test_changes(config, store, camera, from, to, debug_images).await,
    }
}

/// Full pipeline: capture loops + assembly loops + retention loop
async fn run(config: Arc<AppConfig>, store: Arc<FrameStore>) -> anyhow::Result<()> {
    if config.enabled_cameras().count() == 0 {
        anyhow::bail!("no enabled cameras configured");
    }

    match FfmpegCapture::check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg not found; captures and encodes will fail"),
    }

    let capture: Arc<dyn Capture> = Arc::new(FfmpegCapture::new());
    let status = Arc::new(CameraStatusTracker::new());
    let manifest = Arc::new(ManifestPublisher::from_settings(&config.settings).await?);

    let scheduler = Arc::new(CaptureScheduler::new(
        config.clone(),
        store.clone(),
        capture,
        status,
    ));
    let assembler = Arc::new(VideoAssembler::new(
        config.clone(),
        store.clone(),
        Arc::new(FfmpegEncoder::new()),
        manifest,
    ));
    let retention = Arc::new(RetentionManager::new(config.clone(), store));

    scheduler.start().await;
    assembler.clone().start().await;
    retention.clone().start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    assembler.stop().await;
    retention.stop().await;

    // In-flight ffmpeg children die via kill_on_drop; an abandoned
    // encode leaves only a staging file and no manifest change
    Ok(())
}

/// One assembly pass for every enabled camera
async fn generate_videos(config: Arc<AppConfig>, store: Arc<FrameStore>) -> anyhow::Result<()> {
    let manifest = Arc::new(ManifestPublisher::from_settings(&config.settings).await?);
    let assembler = VideoAssembler::new(
        config.clone(),
        store,
        Arc::new(FfmpegEncoder::new()),
        manifest,
    );

    for (camera_id, camera) in config.enabled_cameras() {
        match assembler.run_once(camera_id, camera).await {
            Ok(Some(path)) => {
                tracing::info!(camera_id = %camera_id, video = %path.display(), "Video generated");
            }
            Ok(None) => {
                tracing::info!(camera_id = %camera_id, "No video generated");
            }
            Err(e) => {
                tracing::error!(camera_id = %camera_id, error = %e, "Video generation failed");
            }
        }
    }
    Ok(())
}

/// Single capture attempt for one camera
async fn test_capture(
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
    camera_id: &str,
) -> anyhow::Result<()> {
    let camera = config.cameras.get(camera_id).with_context(|| {
        format!(
            "camera '{}' not found; available: {}",
            camera_id,
            config.cameras.keys().cloned().collect::<Vec<_>>().join(", ")
        )
    })?;

    let capture: Arc<dyn Capture> = Arc::new(FfmpegCapture::new());
    let status = CameraStatusTracker::new();

    match scheduler::capture_once(camera_id, camera, &capture, &store, &status).await {
        Ok(path) => {
            tracing::info!(camera_id = %camera_id, path = %path.display(), "Capture succeeded");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("capture failed: {}", e)),
    }
}

/// Motion replay over stored frames for one or all cameras
async fn test_changes(
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
    camera: Option<String>,
    from: Option<usize>,
    to: Option<usize>,
    debug_images: bool,
) -> anyhow::Result<()> {
    let diagnostics = Diagnostics::new(config.clone(), store);

    let cameras: Vec<String> = match camera {
        Some(id) => {
            anyhow::ensure!(
                config.cameras.contains_key(&id),
                "camera '{}' not found; available: {}",
                id,
                config.cameras.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            vec![id]
        }
        None => config.cameras.keys().cloned().collect(),
    };

    for camera_id in cameras {
        let report = diagnostics
            .test_changes(&camera_id, from, to, debug_images)
            .await?;
        tracing::info!(
            camera_id = %report.camera_id,
            total = report.total,
            kept = report.kept,
            discarded = report.discarded,
            "Replay summary"
        );
    }
    Ok(())
}
