//! Manifest publisher - per-camera "latest video" pointer
//!
//! The manifest is `{output}/videos/{camera_id}.html`, an iframe page
//! the dashboard embeds. The HTML is rendered from a template
//! (placeholders `{{video_path}}` and `$RELPATH`, both replaced with the
//! video path relative to the videos root) and replaced atomically via
//! write-then-rename so readers never observe a partial file. A failed
//! assembly never reaches this module, so the manifest always points at
//! the last successfully published video.

use crate::config::GlobalSettings;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Used when no `iframe_template` is configured, so publishing always
/// refreshes the manifest
const DEFAULT_IFRAME_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><style>html,body{margin:0;height:100%}</style></head>
<body>
<video src="{{video_path}}" controls autoplay muted loop style="width:100%;height:100%"></video>
</body>
</html>
"#;

/// Renders and atomically replaces per-camera manifests
pub struct ManifestPublisher {
    videos_root: PathBuf,
    template: String,
    create_latest_link: bool,
}

impl ManifestPublisher {
    /// Build a publisher from global settings, loading the template file
    /// when one is configured
    pub async fn from_settings(settings: &GlobalSettings) -> Result<Self> {
        let template = match &settings.iframe_template {
            Some(path) => fs::read_to_string(path).await.map_err(|e| {
                Error::Config(format!(
                    "cannot read iframe template {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_IFRAME_TEMPLATE.to_string(),
        };

        Ok(Self {
            videos_root: settings.videos_root(),
            template,
            create_latest_link: settings.create_latest_link,
        })
    }

    #[cfg(test)]
    pub fn with_template(videos_root: PathBuf, template: &str, create_latest_link: bool) -> Self {
        Self {
            videos_root,
            template: template.to_string(),
            create_latest_link,
        }
    }

    /// Path of a camera's manifest file
    pub fn manifest_path(&self, camera_id: &str) -> PathBuf {
        self.videos_root.join(format!("{}.html", camera_id))
    }

    /// Point the camera's manifest at `video_path`.
    ///
    /// `video_path` must be a file inside `{videos_root}/{camera_id}/`.
    pub async fn publish(&self, camera_id: &str, video_path: &Path) -> Result<()> {
        let file_name = video_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Storage(format!("invalid video path {}", video_path.display()))
            })?;
        let relative = format!("{}/{}", camera_id, file_name);

        let html = self
            .template
            .replace("{{video_path}}", &relative)
            .replace("$RELPATH", &relative);

        // Write-then-rename keeps dashboard readers off partial files
        let manifest = self.manifest_path(camera_id);
        let staging = self.videos_root.join(format!(".{}.html.tmp", camera_id));
        fs::write(&staging, html.as_bytes()).await.map_err(|e| {
            Error::Storage(format!("cannot write {}: {}", staging.display(), e))
        })?;
        fs::rename(&staging, &manifest).await.map_err(|e| {
            Error::Storage(format!("cannot replace {}: {}", manifest.display(), e))
        })?;

        tracing::info!(
            camera_id = %camera_id,
            manifest = %manifest.display(),
            video = %relative,
            "Manifest published"
        );

        if self.create_latest_link {
            if let Err(e) = self.refresh_latest_link(camera_id, video_path, file_name).await {
                // The manifest is already valid; the link is convenience only
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %e,
                    "Failed to refresh latest video link"
                );
            }
        }

        Ok(())
    }

    /// Re-point `{videos_root}/{camera_id}/latest.{ext}` at the new video
    async fn refresh_latest_link(
        &self,
        camera_id: &str,
        video_path: &Path,
        file_name: &str,
    ) -> Result<()> {
        let ext = video_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let link = self
            .videos_root
            .join(camera_id)
            .join(format!("latest.{}", ext));

        match fs::remove_file(&link).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        #[cfg(unix)]
        fs::symlink(file_name, &link).await?;
        #[cfg(not(unix))]
        fs::copy(video_path, &link).await.map(|_| ())?;

        tracing::debug!(camera_id = %camera_id, link = %link.display(), "Latest link updated");
        Ok(())
    }
}
