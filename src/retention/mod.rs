//! RetentionManager - frame and video expiry sweeps
//!
//! Runs on the capture interval (the shortest configured period). Frame
//! sweep: delete frames older than `summary_duration`. Video sweep: keep
//! every video from the current day plus the newest per past calendar
//! day, delete the rest. Both sweeps are best-effort idempotent; a
//! failed delete is logged and retried on the next sweep. Frames newer
//! than the horizon are never touched, so an in-flight assembly only
//! ever races retention on frames it already tolerates losing.

use crate::config::AppConfig;
use crate::error::Result;
use crate::frame_store::{FrameStore, TIMESTAMP_FORMAT};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

/// Periodic retention sweeps over the frame ledger and video tree
pub struct RetentionManager {
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
    running: Arc<RwLock<bool>>,
}

impl RetentionManager {
    pub fn new(config: Arc<AppConfig>, store: Arc<FrameStore>) -> Self {
        Self {
            config,
            store,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn the process-wide retention loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Retention manager already running");
                return;
            }
            *running = true;
        }

        let interval = self.config.settings.capture_interval;
        tracing::info!(
            interval = %humantime::format_duration(interval),
            horizon = %humantime::format_duration(self.config.settings.summary_duration),
            "Starting retention manager"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !*self.running.read().await {
                    break;
                }

                let now = Local::now().naive_local();
                if let Err(e) = self.sweep_frames(now).await {
                    tracing::error!(error = %e, "Frame sweep failed");
                }
                if let Err(e) = self.sweep_videos(now.date()).await {
                    tracing::error!(error = %e, "Video sweep failed");
                }
            }

            tracing::info!("Retention manager stopped");
        });
    }

    /// Stop the retention loop after its current sweep
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping retention manager");
    }

    /// Delete frames older than `summary_duration` for every camera
    pub async fn sweep_frames(&self, now: NaiveDateTime) -> Result<()> {
        let horizon = chrono::Duration::from_std(self.config.settings.summary_duration)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = now - horizon;

        for camera_id in self.config.cameras.keys() {
            let frames = self.store.list(camera_id).await?;
            let mut deleted = 0usize;

            for frame in frames.iter().filter(|f| f.timestamp < cutoff) {
                match self.store.delete(camera_id, frame.timestamp).await {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        // Retried on the next sweep
                        tracing::warn!(
                            camera_id = %camera_id,
                            path = %frame.path.display(),
                            error = %e,
                            "Frame delete failed"
                        );
                    }
                }
            }

            if deleted > 0 {
                tracing::info!(
                    camera_id = %camera_id,
                    deleted = deleted,
                    cutoff = %cutoff.format(TIMESTAMP_FORMAT),
                    "Old frames cleaned up"
                );
            }
        }

        Ok(())
    }

    /// Per camera: keep all of today's videos and the newest per past
    /// calendar day, delete the rest
    pub async fn sweep_videos(&self, today: NaiveDate) -> Result<()> {
        let videos_root = self.config.settings.videos_root();

        for camera_id in self.config.cameras.keys() {
            let camera_dir = videos_root.join(camera_id);
            let videos = match list_videos(&camera_dir).await {
                Ok(videos) => videos,
                Err(e) => {
                    tracing::debug!(
                        camera_id = %camera_id,
                        error = %e,
                        "No video directory to sweep"
                    );
                    continue;
                }
            };

            // Group by calendar day, newest first within each day
            let mut by_day: BTreeMap<NaiveDate, Vec<(NaiveDateTime, PathBuf)>> = BTreeMap::new();
            for (timestamp, path) in videos {
                by_day.entry(timestamp.date()).or_default().push((timestamp, path));
            }

            let mut deleted = 0usize;
            for (day, mut entries) in by_day {
                if day >= today {
                    continue;
                }
                entries.sort_by_key(|(timestamp, _)| std::cmp::Reverse(*timestamp));
                for (_, path) in entries.into_iter().skip(1) {
                    match fs::remove_file(&path).await {
                        Ok(()) => {
                            deleted += 1;
                            tracing::debug!(
                                camera_id = %camera_id,
                                path = %path.display(),
                                "Deleted superseded same-day video"
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            tracing::warn!(
                                camera_id = %camera_id,
                                path = %path.display(),
                                error = %e,
                                "Video delete failed"
                            );
                        }
                    }
                }
            }

            if deleted > 0 {
                tracing::info!(
                    camera_id = %camera_id,
                    deleted = deleted,
                    "Old videos cleaned up"
                );
            }
        }

        Ok(())
    }
}

/// Timestamp-named videos in a camera directory. `latest.*` links,
/// hidden staging files and anything non-conforming are skipped.
async fn list_videos(camera_dir: &std::path::Path) -> std::io::Result<Vec<(NaiveDateTime, PathBuf)>> {
    let mut entries = fs::read_dir(camera_dir).await?;
    let mut videos = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || name.starts_with("latest.") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT) {
            videos.push((timestamp, path));
        }
    }

    Ok(videos)
}
