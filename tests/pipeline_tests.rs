//! Integration tests for the capture-retain-filter-assemble pipeline.
//!
//! Drives the real FrameStore, VideoAssembler, ManifestPublisher and
//! RetentionManager over a temp directory, with fake capture/encode
//! collaborators standing in for ffmpeg.

use async_trait::async_trait;
use camlapse::assembler::VideoAssembler;
use camlapse::camera_status::CameraStatusTracker;
use camlapse::capture::Capture;
use camlapse::config::{AppConfig, CameraConfig};
use camlapse::encoder::{Encode, EncodeSpec};
use camlapse::error::{Error, Result};
use camlapse::frame_store::FrameStore;
use camlapse::manifest::ManifestPublisher;
use camlapse::retention::RetentionManager;
use camlapse::scheduler;
use chrono::{NaiveDate, NaiveDateTime};
use image::GrayImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Capture collaborator returning a scripted sequence of outcomes
struct FakeCapture {
    outcomes: Mutex<VecDeque<std::result::Result<Vec<u8>, String>>>,
}

impl FakeCapture {
    fn new(outcomes: Vec<std::result::Result<Vec<u8>, String>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
        })
    }
}

#[async_trait]
impl Capture for FakeCapture {
    async fn capture(&self, _camera_id: &str, _url: &str) -> Result<Vec<u8>> {
        match self.outcomes.lock().await.pop_front() {
            Some(Ok(data)) => Ok(data),
            Some(Err(msg)) => Err(Error::Capture(msg)),
            None => Err(Error::Capture("script exhausted".into())),
        }
    }
}

/// Encode collaborator that records its calls and writes a marker file
struct FakeEncoder {
    calls: Mutex<Vec<Vec<PathBuf>>>,
    fail: AtomicBool,
}

impl FakeEncoder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn last_call(&self) -> Vec<PathBuf> {
        self.calls.lock().await.last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Encode for FakeEncoder {
    async fn encode(&self, frames: &[PathBuf], _spec: EncodeSpec, output: &Path) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Encode("fake encoder failure".into()));
        }
        self.calls.lock().await.push(frames.to_vec());
        tokio::fs::write(output, b"fake video").await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_config(output: &Path, track_changes: bool) -> Arc<AppConfig> {
    let mut config = AppConfig::default();
    config.settings.output_path = output.to_path_buf();
    config.settings.summary_duration = std::time::Duration::from_secs(24 * 3600);
    config.cameras.insert(
        "front".into(),
        CameraConfig {
            name: "Front Door".into(),
            url: "rtsp://fake/stream".into(),
            enabled: true,
            track_changes,
            motion_threshold: Some(25),
            min_motion_area: Some(500),
            blur_kernel: None,
        },
    );
    Arc::new(config)
}

async fn build_assembler(
    config: &Arc<AppConfig>,
    store: &Arc<FrameStore>,
    encoder: &Arc<FakeEncoder>,
) -> VideoAssembler {
    let manifest = Arc::new(
        ManifestPublisher::from_settings(&config.settings)
            .await
            .unwrap(),
    );
    VideoAssembler::new(
        config.clone(),
        store.clone(),
        encoder.clone() as Arc<dyn Encode>,
        manifest,
    )
}

fn jpeg(img: &GrayImage) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn flat(value: u8) -> GrayImage {
    GrayImage::from_pixel(100, 100, image::Luma([value]))
}

/// 100x100 dark frame with a 30x30 bright block (900 px of motion)
fn with_block() -> GrayImage {
    let mut img = flat(0);
    for y in 10..40 {
        for x in 10..40 {
            img.put_pixel(x, y, image::Luma([255]));
        }
    }
    img
}

fn ts(minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 11, 15)
        .unwrap()
        .and_hms_opt(14, minute, 0)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Without motion filtering every stored frame reaches the encoder in
/// ascending timestamp order, and a manifest pointing at the published
/// video appears.
#[tokio::test]
async fn assembly_publishes_video_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;

    for minute in [2, 0, 1] {
        store
            .put("front", ts(minute), &jpeg(&flat(minute as u8 * 50)))
            .await
            .unwrap();
    }

    let camera = config.cameras["front"].clone();
    let video = assembler.run_once("front", &camera).await.unwrap().unwrap();

    assert!(video.exists());
    assert_eq!(encoder.call_count().await, 1);
    let encoded = encoder.last_call().await;
    assert_eq!(encoded.len(), 3);
    let mut sorted = encoded.clone();
    sorted.sort();
    assert_eq!(encoded, sorted, "frames must be encoded in ascending order");

    let manifest = config.settings.videos_root().join("front.html");
    let html = tokio::fs::read_to_string(&manifest).await.unwrap();
    let video_name = video.file_name().unwrap().to_str().unwrap();
    assert!(html.contains(&format!("front/{}", video_name)));
}

/// An empty frame directory aborts the run: no video, no manifest.
#[tokio::test]
async fn empty_frame_directory_aborts_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;

    let camera = config.cameras["front"].clone();
    let result = assembler.run_once("front", &camera).await.unwrap();

    assert!(result.is_none());
    assert_eq!(encoder.call_count().await, 0);
    assert!(!config.settings.videos_root().join("front.html").exists());
}

/// A single frame is not enough for a video.
#[tokio::test]
async fn single_frame_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;

    store.put("front", ts(0), &jpeg(&flat(0))).await.unwrap();

    let camera = config.cameras["front"].clone();
    assert!(assembler.run_once("front", &camera).await.unwrap().is_none());
    assert_eq!(encoder.call_count().await, 0);
}

/// Encoder failure aborts the cycle; the previously published video and
/// manifest stay authoritative and no staging file is left behind.
#[tokio::test]
async fn encoder_failure_never_regresses_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;
    let camera = config.cameras["front"].clone();

    store.put("front", ts(0), &jpeg(&flat(0))).await.unwrap();
    store.put("front", ts(1), &jpeg(&flat(90))).await.unwrap();
    assembler.run_once("front", &camera).await.unwrap().unwrap();

    let manifest = config.settings.videos_root().join("front.html");
    let before = tokio::fs::read_to_string(&manifest).await.unwrap();

    encoder.set_fail(true);
    assert!(assembler.run_once("front", &camera).await.is_err());

    let after = tokio::fs::read_to_string(&manifest).await.unwrap();
    assert_eq!(before, after, "failed run must not touch the manifest");

    // No hidden staging leftovers in the camera video directory
    let camera_dir = config.settings.videos_root().join("front");
    let hidden: Vec<_> = std::fs::read_dir(&camera_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(hidden.is_empty(), "staging files left behind: {:?}", hidden);
}

/// Two immediate runs over the same frames both publish; the manifest
/// ends up pointing at a video file that exists.
#[tokio::test]
async fn double_run_keeps_manifest_valid() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;
    let camera = config.cameras["front"].clone();

    store.put("front", ts(0), &jpeg(&flat(0))).await.unwrap();
    store.put("front", ts(1), &jpeg(&flat(90))).await.unwrap();

    assembler.run_once("front", &camera).await.unwrap().unwrap();
    // Spread the runs over distinct seconds so the output names differ
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let second = assembler.run_once("front", &camera).await.unwrap().unwrap();

    let html = tokio::fs::read_to_string(config.settings.videos_root().join("front.html"))
        .await
        .unwrap();
    let name = second.file_name().unwrap().to_str().unwrap();
    assert!(html.contains(&format!("front/{}", name)));
    assert!(second.exists());
}

/// track_changes camera: 5 frames where 1-2 are identical, 3 adds a
/// 30x30 bright block and 4-5 repeat it. Only frames 1 and 3 reach the
/// encoder.
#[tokio::test]
async fn motion_filter_selects_first_and_changed_frames() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), true);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;
    let camera = config.cameras["front"].clone();

    let base = jpeg(&flat(0));
    let block = jpeg(&with_block());
    store.put("front", ts(0), &base).await.unwrap();
    store.put("front", ts(1), &base).await.unwrap();
    store.put("front", ts(2), &block).await.unwrap();
    store.put("front", ts(3), &block).await.unwrap();
    store.put("front", ts(4), &block).await.unwrap();

    assembler.run_once("front", &camera).await.unwrap().unwrap();

    let encoded = encoder.last_call().await;
    let names: Vec<_> = encoded
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["20231115_140000.jpg", "20231115_140200.jpg"]);
}

/// track_changes camera where nothing ever changes: only the first
/// frame survives filtering, so the run aborts and no manifest appears.
#[tokio::test]
async fn static_scene_aborts_after_filtering() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), true);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;
    let camera = config.cameras["front"].clone();

    let base = jpeg(&flat(0));
    for minute in 0..4 {
        store.put("front", ts(minute), &base).await.unwrap();
    }

    assert!(assembler.run_once("front", &camera).await.unwrap().is_none());
    assert_eq!(encoder.call_count().await, 0);
    assert!(!config.settings.videos_root().join("front.html").exists());
}

// ---------------------------------------------------------------------------
// Capture scheduling
// ---------------------------------------------------------------------------

/// Three failed captures followed by one success leave exactly one
/// stored frame and no crash.
#[tokio::test]
async fn capture_failures_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let status = CameraStatusTracker::new();
    let capture = FakeCapture::new(vec![
        Err("stream unreachable".into()),
        Err("stream unreachable".into()),
        Err("stream unreachable".into()),
        Ok(jpeg(&flat(0))),
    ]);
    let capture: Arc<dyn Capture> = capture;
    let camera = config.cameras["front"].clone();

    for _ in 0..3 {
        assert!(
            scheduler::capture_once("front", &camera, &capture, &store, &status)
                .await
                .is_err()
        );
    }
    scheduler::capture_once("front", &camera, &capture, &store, &status)
        .await
        .unwrap();

    assert_eq!(store.list("front").await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// After a frame sweep nothing older than the horizon remains and
/// nothing newer was removed; a following assembly still works off the
/// surviving frames.
#[tokio::test]
async fn retention_then_assembly_uses_surviving_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.settings.output_path = dir.path().to_path_buf();
    config.settings.summary_duration = std::time::Duration::from_secs(600);
    config.cameras.insert(
        "front".into(),
        CameraConfig {
            name: "Front Door".into(),
            url: "rtsp://fake/stream".into(),
            enabled: true,
            track_changes: false,
            motion_threshold: None,
            min_motion_area: None,
            blur_kernel: None,
        },
    );
    let config = Arc::new(config);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let encoder = FakeEncoder::new();
    let assembler = build_assembler(&config, &store, &encoder).await;
    let retention = RetentionManager::new(config.clone(), store.clone());

    // Two frames well past the 10 minute horizon, two inside it
    store.put("front", ts(0), &jpeg(&flat(0))).await.unwrap();
    store.put("front", ts(5), &jpeg(&flat(20))).await.unwrap();
    store.put("front", ts(45), &jpeg(&flat(40))).await.unwrap();
    store.put("front", ts(50), &jpeg(&flat(90))).await.unwrap();

    retention.sweep_frames(ts(55)).await.unwrap();

    let remaining = store.list("front").await.unwrap();
    let times: Vec<_> = remaining.iter().map(|f| f.timestamp).collect();
    assert_eq!(times, vec![ts(45), ts(50)]);

    let camera = config.cameras["front"].clone();
    assembler.run_once("front", &camera).await.unwrap().unwrap();
    assert_eq!(encoder.last_call().await.len(), 2);
}

/// After a video sweep each past calendar day holds at most one video.
#[tokio::test]
async fn video_sweep_bounds_each_past_day_to_one_video() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);
    let store = Arc::new(FrameStore::new(config.settings.frames_root()));
    let retention = RetentionManager::new(config.clone(), store);

    let camera_dir = config.settings.videos_root().join("front");
    tokio::fs::create_dir_all(&camera_dir).await.unwrap();
    for name in [
        "20231110_080000.mp4",
        "20231110_120000.mp4",
        "20231110_220000.mp4",
        "20231112_060000.mp4",
        "20231112_180000.mp4",
    ] {
        tokio::fs::write(camera_dir.join(name), b"video").await.unwrap();
    }

    let today = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
    retention.sweep_videos(today).await.unwrap();

    let mut names: Vec<String> = std::fs::read_dir(&camera_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "20231110_220000.mp4".to_string(),
            "20231112_180000.mp4".to_string(),
        ]
    );
}
