//! CaptureScheduler - periodic frame capture per camera
//!
//! One independent tokio task per enabled camera, ticking at
//! `capture_interval`. A slow or failing camera never delays another
//! camera's ticks. A failed capture is logged and skipped; the next tick
//! still fires at the nominal period (missed ticks are skipped, never
//! bursted), which bounds worst-case staleness to one interval.

use crate::camera_status::CameraStatusTracker;
use crate::capture::Capture;
use crate::config::{AppConfig, CameraConfig};
use crate::error::Result;
use crate::frame_store::FrameStore;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

/// Drives periodic captures for all enabled cameras
pub struct CaptureScheduler {
    config: Arc<AppConfig>,
    store: Arc<FrameStore>,
    capture: Arc<dyn Capture>,
    status: Arc<CameraStatusTracker>,
    running: Arc<RwLock<bool>>,
}

impl CaptureScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<FrameStore>,
        capture: Arc<dyn Capture>,
        status: Arc<CameraStatusTracker>,
    ) -> Self {
        Self {
            config,
            store,
            capture,
            status,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn one capture loop per enabled camera
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Capture scheduler already running");
                return;
            }
            *running = true;
        }

        let interval = self.config.settings.capture_interval;
        tracing::info!(
            interval = %humantime::format_duration(interval),
            cameras = self.config.enabled_cameras().count(),
            "Starting capture scheduler"
        );

        for (camera_id, camera) in self.config.enabled_cameras() {
            let camera_id = camera_id.clone();
            let camera = camera.clone();
            let store = self.store.clone();
            let capture = self.capture.clone();
            let status = self.status.clone();
            let running = self.running.clone();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;

                    if !*running.read().await {
                        break;
                    }

                    match capture_once(&camera_id, &camera, &capture, &store, &status).await
                    {
                        Ok(path) => {
                            tracing::debug!(
                                camera_id = %camera_id,
                                path = %path.display(),
                                "Capture tick complete"
                            );
                        }
                        Err(e) => {
                            // Transition logging happens in the tracker;
                            // per-tick failures stay quiet
                            tracing::debug!(
                                camera_id = %camera_id,
                                error = %e,
                                "Capture tick failed, waiting for next tick"
                            );
                        }
                    }
                }

                tracing::info!(camera_id = %camera_id, "Capture loop stopped");
            });
        }
    }

    /// Stop all capture loops after their current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping capture scheduler");
    }
}

/// One capture attempt: grab a still, store it under the current
/// second-precision local timestamp. Also drives status transitions.
pub async fn capture_once(
    camera_id: &str,
    camera: &CameraConfig,
    capture: &Arc<dyn Capture>,
    store: &FrameStore,
    status: &CameraStatusTracker,
) -> Result<PathBuf> {
    let data = match capture.capture(camera_id, &camera.url).await {
        Ok(data) => {
            status.update(camera_id, true).await;
            data
        }
        Err(e) => {
            status.update(camera_id, false).await;
            return Err(e);
        }
    };

    let timestamp = Local::now().naive_local();
    store.put(camera_id, timestamp, &data).await
}
