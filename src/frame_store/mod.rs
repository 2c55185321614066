//! FrameStore - filesystem-backed frame ledger
//!
//! One directory per camera under `{output}/frames/`. Frame identity is
//! (camera id, second-precision timestamp); the file name is the timestamp
//! formatted as `%Y%m%d_%H%M%S`, so lexical order equals chronological
//! order. Records are append-only until retention deletes them.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File-name timestamp format; lexical order == chronological order
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One captured still image on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Owning camera
    pub camera_id: String,
    /// Capture timestamp (second precision, local clock)
    pub timestamp: NaiveDateTime,
    /// Absolute or config-relative path of the JPEG
    pub path: PathBuf,
}

impl FrameRecord {
    /// File name without extension, e.g. `20231115_143022`
    pub fn file_stem(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Filesystem-backed, per-camera frame ledger
pub struct FrameStore {
    frames_root: PathBuf,
}

impl FrameStore {
    /// Create a store rooted at `{output}/frames`
    pub fn new(frames_root: PathBuf) -> Self {
        Self { frames_root }
    }

    /// Directory holding one camera's frames
    pub fn camera_dir(&self, camera_id: &str) -> PathBuf {
        self.frames_root.join(camera_id)
    }

    /// Write one frame. Creates the camera directory on demand.
    pub async fn put(
        &self,
        camera_id: &str,
        timestamp: NaiveDateTime,
        data: &[u8],
    ) -> Result<PathBuf> {
        let camera_dir = self.camera_dir(camera_id);
        fs::create_dir_all(&camera_dir).await.map_err(|e| {
            Error::Storage(format!(
                "cannot create {}: {}",
                camera_dir.display(),
                e
            ))
        })?;

        let path = camera_dir.join(format!("{}.jpg", timestamp.format(TIMESTAMP_FORMAT)));
        fs::write(&path, data).await.map_err(|e| {
            Error::Storage(format!("cannot write {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            camera_id = %camera_id,
            path = %path.display(),
            size = data.len(),
            "Frame stored"
        );

        Ok(path)
    }

    /// All frames for a camera, ascending by timestamp.
    ///
    /// A missing camera directory yields an empty list, not an error.
    /// Files whose names do not parse as timestamps are skipped.
    pub async fn list(&self, camera_id: &str) -> Result<Vec<FrameRecord>> {
        let camera_dir = self.camera_dir(camera_id);

        let mut entries = match fs::read_dir(&camera_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "cannot read {}: {}",
                    camera_dir.display(),
                    e
                )))
            }
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            Error::Storage(format!("cannot read {}: {}", camera_dir.display(), e))
        })? {
            let path = entry.path();
            match parse_frame_path(camera_id, &path) {
                Some(record) => frames.push(record),
                None => {
                    tracing::debug!(
                        camera_id = %camera_id,
                        path = %path.display(),
                        "Skipping non-frame file"
                    );
                }
            }
        }

        frames.sort_by_key(|f| f.timestamp);
        Ok(frames)
    }

    /// Frames within `[from, to]` inclusive, ascending by timestamp
    pub async fn list_range(
        &self,
        camera_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<FrameRecord>> {
        let frames = self.list(camera_id).await?;
        Ok(frames
            .into_iter()
            .filter(|f| f.timestamp >= from && f.timestamp <= to)
            .collect())
    }

    /// Delete one frame. Deleting a missing frame is a no-op.
    pub async fn delete(&self, camera_id: &str, timestamp: NaiveDateTime) -> Result<()> {
        let path = self
            .camera_dir(camera_id)
            .join(format!("{}.jpg", timestamp.format(TIMESTAMP_FORMAT)));

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "cannot delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Parse `{camera_dir}/{%Y%m%d_%H%M%S}.jpg` into a record
fn parse_frame_path(camera_id: &str, path: &Path) -> Option<FrameRecord> {
    if path.extension().and_then(|e| e.to_str()) != Some("jpg") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let timestamp = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok()?;
    Some(FrameRecord {
        camera_id: camera_id.to_string(),
        timestamp,
        path: path.to_path_buf(),
    })
}
