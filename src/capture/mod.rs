//! Capture collaborator - one still image per invocation
//!
//! The scheduler only sees the `Capture` trait, so the pipeline is
//! testable with fakes. The production implementation shells out to
//! ffmpeg for RTSP streams and falls back to a plain HTTP GET for
//! snapshot URLs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default ffmpeg/HTTP timeout per capture attempt
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Grabs one still image from a stream address
#[async_trait]
pub trait Capture: Send + Sync {
    /// Capture a single frame as JPEG bytes
    async fn capture(&self, camera_id: &str, url: &str) -> Result<Vec<u8>>;
}

/// Production capture: ffmpeg for rtsp://, reqwest for http(s)://
pub struct FfmpegCapture {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl FfmpegCapture {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            timeout_secs,
        }
    }

    /// Capture one frame from an RTSP stream using ffmpeg.
    ///
    /// kill_on_drop ensures the child is killed when the timeout cancels
    /// the wait future, so unresponsive cameras cannot accumulate zombie
    /// ffmpeg processes.
    async fn capture_rtsp(&self, rtsp_url: &str) -> Result<Vec<u8>> {
        let child = Command::new("ffmpeg")
            .args([
                "-rtsp_transport",
                "tcp",
                "-i",
                rtsp_url,
                "-frames:v",
                "1",
                "-q:v",
                "2",
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-loglevel",
                "error",
                "-y",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(self.timeout_secs);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::Capture(format!(
                        "ffmpeg failed: {}",
                        stderr.trim()
                    )));
                }
                if output.stdout.is_empty() {
                    return Err(Error::Capture("ffmpeg returned empty output".to_string()));
                }
                Ok(output.stdout)
            }
            Ok(Err(e)) => Err(Error::Capture(format!("ffmpeg execution failed: {}", e))),
            Err(_) => Err(Error::Capture(format!(
                "ffmpeg timeout ({}s), process killed",
                self.timeout_secs
            ))),
        }
    }

    /// Fetch a snapshot URL over HTTP(S)
    async fn capture_http(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Capture(format!(
                "snapshot HTTP error: {}",
                resp.status()
            )));
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Capture("snapshot HTTP returned empty body".into()));
        }
        Ok(bytes.to_vec())
    }

    /// Check that ffmpeg is on the PATH, returning its version line
    pub async fn check_ffmpeg() -> Result<String> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Capture(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Capture("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        let first_line = version.lines().next().unwrap_or("unknown");
        Ok(first_line.to_string())
    }
}

impl Default for FfmpegCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capture for FfmpegCapture {
    async fn capture(&self, camera_id: &str, url: &str) -> Result<Vec<u8>> {
        let data = if url.starts_with("http://") || url.starts_with("https://") {
            self.capture_http(url).await?
        } else {
            self.capture_rtsp(url).await?
        };

        tracing::debug!(
            camera_id = %camera_id,
            size = data.len(),
            "Frame captured"
        );
        Ok(data)
    }
}
