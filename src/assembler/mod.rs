//! VideoAssembler - motion-filtered timelapse generation per camera
//!
//! Each run walks SELECTING -> ENCODING -> PUBLISHING. A per-camera
//! lease is taken with try-semantics at the start of every tick: when a
//! previous run for the same camera is still encoding, the new tick is
//! logged as a skipped cycle and dropped, never queued. Encoder output
//! goes to a hidden staging file first; the final timestamped name and
//! the manifest only appear after a fully successful encode, so a failed
//! or abandoned run never regresses the dashboard-visible state.

use crate::config::{AppConfig, CameraConfig};
use crate::encoder::{Encode, EncodeSpec};
use crate::error::Result;
use crate::frame_store::{FrameRecord, FrameStore, TIMESTAMP_FORMAT};
use crate::manifest::ManifestPublisher;
use crate::motion::{self, MotionParams, SequenceFilter};
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::MissedTickBehavior;

/// Minimum selected frames for a usable video; below this the run
/// aborts with no output and no manifest change
const MIN_FRAMES: usize = 2;

/// Per-camera assembly mutual exclusion
pub struct AssemblyLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AssemblyLocks {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Try to take the camera's assembly lease without waiting
    pub async fn try_acquire(&self, camera_id: &str) -> Option<AssemblyLease> {
        let lock = self.get_or_create_lock(camera_id).await;
        match lock.try_lock_owned() {
            Ok(guard) => {
                tracing::debug!(camera_id = %camera_id, "Assembly lease acquired");
                Some(AssemblyLease {
                    camera_id: camera_id.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => None,
        }
    }

    async fn get_or_create_lock(&self, camera_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(camera_id) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for AssemblyLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembly lease, released on drop
pub struct AssemblyLease {
    camera_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for AssemblyLease {
    fn drop(&mut self) {
        tracing::debug!(camera_id = %self.camera_id, "Assembly lease released");
    }
}

/// Drives periodic video assembly for all enabled cameras
pub struct VideoAssembler {
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
    encoder: Arc<dyn Encode>,
    manifest: Arc<ManifestPublisher>,
    locks: Arc<AssemblyLocks>,
    running: Arc<RwLock<bool>>,
}

impl VideoAssembler {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<FrameStore>,
        encoder: Arc<dyn Encode>,
        manifest: Arc<ManifestPublisher>,
    ) -> Self {
        Self {
            config,
            store,
            encoder,
            manifest,
            locks: Arc::new(AssemblyLocks::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn one assembly loop per enabled camera
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Video assembler already running");
                return;
            }
            *running = true;
        }

        let interval = self.config.settings.video_generation_interval;
        tracing::info!(
            interval = %humantime::format_duration(interval),
            "Starting video assembler"
        );

        for (camera_id, camera) in self.config.enabled_cameras() {
            let camera_id = camera_id.clone();
            let camera = camera.clone();
            let assembler = self.clone();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first interval tick fires immediately; a video of
                // zero elapsed time is pointless, so consume it
                ticker.tick().await;

                loop {
                    ticker.tick().await;

                    if !*assembler.running.read().await {
                        break;
                    }

                    if let Err(e) = assembler.run_once(&camera_id, &camera).await {
                        tracing::error!(
                            camera_id = %camera_id,
                            error = %e,
                            "Assembly cycle failed"
                        );
                    }
                }

                tracing::info!(camera_id = %camera_id, "Assembly loop stopped");
            });
        }
    }

    /// Stop all assembly loops after their current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping video assembler");
    }

    /// One assembly run: select, encode, publish.
    ///
    /// Returns the published video path, or `None` when the cycle was
    /// skipped (lease busy) or aborted (not enough frames).
    pub async fn run_once(
        &self,
        camera_id: &str,
        camera: &CameraConfig,
    ) -> Result<Option<PathBuf>> {
        let _lease = match self.locks.try_acquire(camera_id).await {
            Some(lease) => lease,
            None => {
                tracing::warn!(
                    camera_id = %camera_id,
                    "Previous assembly still running, skipping cycle"
                );
                return Ok(None);
            }
        };

        // SELECTING
        tracing::debug!(camera_id = %camera_id, phase = "selecting", "Assembly run started");
        let frames = self.store.list(camera_id).await?;
        let total = frames.len();

        let selected = if camera.track_changes {
            let params = self.config.motion_params(camera);
            let id = camera_id.to_string();
            tokio::task::spawn_blocking(move || select_by_motion(&id, frames, params))
                .await
                .map_err(|e| {
                    crate::error::Error::Encode(format!("selection task failed: {}", e))
                })?
        } else {
            frames
        };

        if selected.len() < MIN_FRAMES {
            tracing::info!(
                camera_id = %camera_id,
                total = total,
                selected = selected.len(),
                "Not enough frames for a video, aborting run"
            );
            return Ok(None);
        }

        // Snapshot the paths and drop any the retention sweep deleted
        // since listing; a vanished frame is treated as excluded
        let mut paths = Vec::with_capacity(selected.len());
        for frame in &selected {
            if fs::try_exists(&frame.path).await.unwrap_or(false) {
                paths.push(frame.path.clone());
            } else {
                tracing::debug!(
                    camera_id = %camera_id,
                    path = %frame.path.display(),
                    "Frame vanished before encode, excluding"
                );
            }
        }
        if paths.len() < MIN_FRAMES {
            tracing::info!(
                camera_id = %camera_id,
                "Too many frames vanished before encode, aborting run"
            );
            return Ok(None);
        }

        tracing::info!(
            camera_id = %camera_id,
            total = total,
            selected = paths.len(),
            track_changes = camera.track_changes,
            "Frames selected for video"
        );

        // ENCODING: write to a hidden staging file; a crashed or failed
        // run leaves only a dot-file behind
        tracing::debug!(camera_id = %camera_id, phase = "encoding", "Encoding selected frames");
        let settings = &self.config.settings;
        let ext = &settings.video_format;
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let camera_dir = settings.videos_root().join(camera_id);
        fs::create_dir_all(&camera_dir).await?;

        let staging = camera_dir.join(format!(".{}.tmp.{}", stamp, ext));
        let spec = EncodeSpec {
            height: settings.resolution_height(),
            fps: settings.video_fps,
        };

        if let Err(e) = self.encoder.encode(&paths, spec, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        // PUBLISHING: fresh timestamped name, then atomic manifest swap
        tracing::debug!(camera_id = %camera_id, phase = "publishing", "Publishing video");
        let video_path = camera_dir.join(format!("{}.{}", stamp, ext));
        fs::rename(&staging, &video_path).await?;
        self.manifest.publish(camera_id, &video_path).await?;

        tracing::info!(
            camera_id = %camera_id,
            video = %video_path.display(),
            frames = paths.len(),
            "Video published"
        );
        Ok(Some(video_path))
    }
}

/// Motion-filter a frame sequence against the last kept frame.
///
/// Blocking (file reads + pixel work); run under `spawn_blocking`. The
/// first frame is always kept. Vanished files are excluded, undecodable
/// files are kept but never become the reference.
fn select_by_motion(
    camera_id: &str,
    frames: Vec<FrameRecord>,
    params: MotionParams,
) -> Vec<FrameRecord> {
    let mut filter = SequenceFilter::new(params);
    let mut kept = Vec::new();

    for frame in frames {
        let data = match std::fs::read(&frame.path) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(
                    camera_id = %camera_id,
                    path = %frame.path.display(),
                    error = %e,
                    "Frame unreadable during selection, excluding"
                );
                continue;
            }
        };

        let gray = match motion::decode_gray(&data) {
            Ok(gray) => gray,
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    path = %frame.path.display(),
                    error = %e,
                    "Frame undecodable, keeping without comparison"
                );
                kept.push(frame);
                continue;
            }
        };

        match filter.push(gray) {
            None => {
                tracing::debug!(
                    camera_id = %camera_id,
                    frame = %frame.file_stem(),
                    "First frame, keeping unconditionally"
                );
                kept.push(frame);
            }
            Some(decision) => {
                tracing::debug!(
                    camera_id = %camera_id,
                    frame = %frame.file_stem(),
                    keep = decision.keep,
                    mean_diff = format!("{:.2}", decision.stats.mean_diff),
                    max_diff = decision.stats.max_diff,
                    change_percent = format!("{:.2}", decision.stats.change_percent),
                    significant_areas = ?decision.stats.significant_areas,
                    "Motion decision"
                );
                if decision.keep {
                    kept.push(frame);
                }
            }
        }
    }

    kept
}
