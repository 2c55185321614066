//! Diagnostic mode - replay motion decisions over stored frames
//!
//! Read-only inspection surface over FrameStore + MotionAnalyzer: walks
//! a camera's frame range with the same reference-advance policy the
//! assembler uses, logs per-pair statistics, and optionally writes the
//! four visualization images per pair under `{output}/debug/`. Nothing
//! in the capture/assembly lifecycle is touched.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::frame_store::FrameStore;
use crate::motion::{self, debug::DebugImages, MotionDecision, MotionParams, SequenceFilter};
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome for one frame of a replayed sequence
#[derive(Debug)]
pub struct FrameOutcome {
    /// Index into the ascending frame list
    pub index: usize,
    /// Frame file stem, e.g. `20231115_143022`
    pub frame: String,
    /// Whether the frame would be kept
    pub kept: bool,
    /// The decision; `None` for the first frame of the range
    pub decision: Option<MotionDecision>,
}

/// Replay summary for one camera
#[derive(Debug)]
pub struct MotionReport {
    pub camera_id: String,
    pub total: usize,
    pub kept: usize,
    pub discarded: usize,
    pub outcomes: Vec<FrameOutcome>,
}

/// Read-only motion inspection over stored frames
pub struct Diagnostics {
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
}

impl Diagnostics {
    pub fn new(config: Arc<AppConfig>, store: Arc<FrameStore>) -> Self {
        Self { config, store }
    }

    /// Replay motion decisions for `camera_id` over `[from, to)` of its
    /// ascending frame list (whole list when unset). With `debug_images`
    /// the four visualization images per pair are written to
    /// `{output}/debug/{camera_id}/{NNNN}_{kind}.png`.
    pub async fn test_changes(
        &self,
        camera_id: &str,
        from: Option<usize>,
        to: Option<usize>,
        debug_images: bool,
    ) -> Result<MotionReport> {
        let camera = self
            .config
            .cameras
            .get(camera_id)
            .ok_or_else(|| Error::Config(format!("unknown camera '{}'", camera_id)))?;
        let params = self.config.motion_params(camera);

        let frames = self.store.list(camera_id).await?;
        let start = from.unwrap_or(0).min(frames.len());
        let end = to.unwrap_or(frames.len()).clamp(start, frames.len());
        let frames = frames[start..end].to_vec();

        if frames.len() < 2 {
            tracing::warn!(
                camera_id = %camera_id,
                frames = frames.len(),
                "Not enough frames in range to compare"
            );
        }

        tracing::info!(
            camera_id = %camera_id,
            frames = frames.len(),
            from = start,
            to = end,
            track_changes = camera.track_changes,
            motion_threshold = params.motion_threshold,
            min_motion_area = params.min_motion_area,
            blur_kernel = params.blur_kernel,
            "Replaying motion decisions"
        );

        let debug_dir = if debug_images {
            let dir = self.config.settings.debug_root().join(camera_id);
            tokio::fs::create_dir_all(&dir).await?;
            Some(dir)
        } else {
            None
        };

        let id = camera_id.to_string();
        let report = tokio::task::spawn_blocking(move || {
            replay(&id, frames, start, params, debug_dir)
        })
        .await
        .map_err(|e| Error::Storage(format!("replay task failed: {}", e)))??;

        tracing::info!(
            camera_id = %camera_id,
            total = report.total,
            kept = report.kept,
            discarded = report.discarded,
            "Motion replay complete"
        );
        Ok(report)
    }
}

/// Blocking replay body; runs under `spawn_blocking`
fn replay(
    camera_id: &str,
    frames: Vec<crate::frame_store::FrameRecord>,
    start: usize,
    params: MotionParams,
    debug_dir: Option<PathBuf>,
) -> Result<MotionReport> {
    let mut filter = SequenceFilter::new(params);
    let mut outcomes = Vec::with_capacity(frames.len());
    let mut kept_count = 0usize;

    for (offset, frame) in frames.iter().enumerate() {
        let index = start + offset;
        let stem = frame.file_stem();

        let gray = match std::fs::read(&frame.path)
            .map_err(Error::from)
            .and_then(|data| motion::decode_gray(&data))
        {
            Ok(gray) => gray,
            Err(e) => {
                // Matches selection behavior: unreadable frames are kept
                tracing::info!(
                    camera_id = %camera_id,
                    index = index,
                    frame = %stem,
                    error = %e,
                    "Frame unreadable, would be kept"
                );
                kept_count += 1;
                outcomes.push(FrameOutcome {
                    index,
                    frame: stem,
                    kept: true,
                    decision: None,
                });
                continue;
            }
        };

        if let (Some(dir), Some(reference)) = (&debug_dir, filter.reference()) {
            let images = motion::debug::render(reference, &gray, &params);
            write_debug_images(dir, index, &images)?;
        }

        match filter.push(gray) {
            None => {
                tracing::info!(
                    camera_id = %camera_id,
                    index = index,
                    frame = %stem,
                    "No previous frame, keeping"
                );
                kept_count += 1;
                outcomes.push(FrameOutcome {
                    index,
                    frame: stem,
                    kept: true,
                    decision: None,
                });
            }
            Some(decision) => {
                tracing::info!(
                    camera_id = %camera_id,
                    index = index,
                    frame = %stem,
                    keep = decision.keep,
                    mean_diff = format!("{:.2}", decision.stats.mean_diff),
                    max_diff = decision.stats.max_diff,
                    changed_pixels = decision.stats.changed_pixels,
                    change_percent = format!("{:.2}", decision.stats.change_percent),
                    contours = decision.stats.component_areas.len(),
                    significant_areas = ?decision.stats.significant_areas,
                    "Motion decision"
                );
                if decision.keep {
                    kept_count += 1;
                }
                outcomes.push(FrameOutcome {
                    index,
                    frame: stem,
                    kept: decision.keep,
                    decision: Some(decision),
                });
            }
        }
    }

    let total = outcomes.len();
    Ok(MotionReport {
        camera_id: camera_id.to_string(),
        total,
        kept: kept_count,
        discarded: total - kept_count,
        outcomes,
    })
}

fn write_debug_images(dir: &PathBuf, index: usize, images: &DebugImages) -> Result<()> {
    images.diff.save(dir.join(format!("{:04}_diff.png", index)))?;
    images.mask.save(dir.join(format!("{:04}_mask.png", index)))?;
    images
        .contours
        .save(dir.join(format!("{:04}_contours.png", index)))?;
    images
        .significant
        .save(dir.join(format!("{:04}_significant.png", index)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use chrono::NaiveDate;
    use image::GrayImage;

    fn setup(track_changes: bool, output: &std::path::Path) -> (Arc<AppConfig>, Arc<FrameStore>) {
        let mut config = AppConfig::default();
        config.settings.output_path = output.to_path_buf();
        config.cameras.insert(
            "front".into(),
            CameraConfig {
                name: "Front".into(),
                url: "rtsp://example/stream".into(),
                enabled: true,
                track_changes,
                motion_threshold: Some(25),
                min_motion_area: Some(500),
                blur_kernel: None,
            },
        );
        let store = Arc::new(FrameStore::new(config.settings.frames_root()));
        (Arc::new(config), store)
    }

    fn jpeg(img: &GrayImage) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    async fn put_frame(store: &FrameStore, minute: u32, img: &GrayImage) {
        let ts = NaiveDate::from_ymd_opt(2023, 11, 15)
            .unwrap()
            .and_hms_opt(14, minute, 0)
            .unwrap();
        store.put("front", ts, &jpeg(img)).await.unwrap();
    }

    #[tokio::test]
    async fn test_replay_five_frame_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = setup(true, dir.path());

        let base = GrayImage::from_pixel(100, 100, image::Luma([0]));
        let mut block = base.clone();
        for y in 10..40 {
            for x in 10..40 {
                block.put_pixel(x, y, image::Luma([255]));
            }
        }

        // Frames 1-2 identical, frame 3 gains a 30x30 block, 4-5 equal 3
        put_frame(&store, 0, &base).await;
        put_frame(&store, 1, &base).await;
        put_frame(&store, 2, &block).await;
        put_frame(&store, 3, &block).await;
        put_frame(&store, 4, &block).await;

        let diagnostics = Diagnostics::new(config, store);
        let report = diagnostics
            .test_changes("front", None, None, false)
            .await
            .unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.kept, 2);
        assert_eq!(report.discarded, 3);
        let kept: Vec<usize> = report
            .outcomes
            .iter()
            .filter(|o| o.kept)
            .map(|o| o.index)
            .collect();
        assert_eq!(kept, vec![0, 2]);

        // Frame 3 carries the 900 px component
        let decision = report.outcomes[2].decision.as_ref().unwrap();
        assert!(decision
            .stats
            .significant_areas
            .iter()
            .any(|&area| area >= 900));
    }

    #[tokio::test]
    async fn test_replay_writes_debug_images() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = setup(true, dir.path());

        let base = GrayImage::from_pixel(50, 50, image::Luma([0]));
        let bright = GrayImage::from_pixel(50, 50, image::Luma([255]));
        put_frame(&store, 0, &base).await;
        put_frame(&store, 1, &bright).await;

        let diagnostics = Diagnostics::new(config.clone(), store);
        diagnostics
            .test_changes("front", None, None, true)
            .await
            .unwrap();

        let debug_dir = config.settings.debug_root().join("front");
        for kind in ["diff", "mask", "contours", "significant"] {
            assert!(
                debug_dir.join(format!("0001_{}.png", kind)).exists(),
                "missing {} image",
                kind
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_camera_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = setup(false, dir.path());
        let diagnostics = Diagnostics::new(config, store);
        assert!(diagnostics
            .test_changes("nobody", None, None, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_range_limits_replay() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = setup(true, dir.path());
        let base = GrayImage::from_pixel(50, 50, image::Luma([0]));
        for minute in 0..5 {
            put_frame(&store, minute, &base).await;
        }

        let diagnostics = Diagnostics::new(config, store);
        let report = diagnostics
            .test_changes("front", Some(1), Some(4), false)
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.outcomes[0].index, 1);
        assert_eq!(report.outcomes[2].index, 3);
    }
}
