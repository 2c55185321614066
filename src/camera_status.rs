//! Camera status tracker
//!
//! Tracks per-camera connection status so only lost/recovered
//! transitions are logged at warn/info. Per-tick capture failures stay
//! at debug, which keeps flapping cameras from spamming the log.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Camera connection status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Initial state (never captured)
    Unknown,
    /// Last capture succeeded
    Online,
    /// Last capture failed
    Offline,
}

/// Status transition event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Camera went from Online (or initial) to Offline
    Lost,
    /// Camera went from Offline back to Online
    Recovered,
}

/// Tracks camera connection status and detects transitions
pub struct CameraStatusTracker {
    statuses: RwLock<HashMap<String, ConnectionStatus>>,
}

impl CameraStatusTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Record the outcome of one capture attempt.
    ///
    /// Returns the transition event when one occurred; identical
    /// consecutive outcomes return `None`. The first failure after
    /// startup counts as `Lost`.
    pub async fn update(&self, camera_id: &str, is_online: bool) -> Option<StatusEvent> {
        let mut statuses = self.statuses.write().await;
        let prev = statuses
            .get(camera_id)
            .cloned()
            .unwrap_or(ConnectionStatus::Unknown);

        let next = if is_online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        statuses.insert(camera_id.to_string(), next.clone());

        match (&prev, &next) {
            (ConnectionStatus::Online, ConnectionStatus::Offline) => {
                tracing::warn!(camera_id = %camera_id, "Camera connection lost");
                Some(StatusEvent::Lost)
            }
            (ConnectionStatus::Offline, ConnectionStatus::Online) => {
                tracing::info!(camera_id = %camera_id, "Camera connection recovered");
                Some(StatusEvent::Recovered)
            }
            (ConnectionStatus::Unknown, ConnectionStatus::Offline) => {
                tracing::warn!(camera_id = %camera_id, "Camera initial capture failed - marking as lost");
                Some(StatusEvent::Lost)
            }
            _ => None,
        }
    }

    /// Current status for a camera
    pub async fn status(&self, camera_id: &str) -> ConnectionStatus {
        self.statuses
            .read()
            .await
            .get(camera_id)
            .cloned()
            .unwrap_or(ConnectionStatus::Unknown)
    }

    /// Cameras currently marked offline
    pub async fn offline_cameras(&self) -> Vec<String> {
        self.statuses
            .read()
            .await
            .iter()
            .filter(|(_, status)| **status == ConnectionStatus::Offline)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Default for CameraStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
