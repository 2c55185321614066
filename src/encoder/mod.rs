//! Encode collaborator - frame sequence to timelapse video
//!
//! The assembler only sees the `Encode` trait. The production
//! implementation drives ffmpeg's concat demuxer: an input list file is
//! written next to the output, each frame is shown for one output frame
//! period, and the result is scaled to the configured height.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Encoder timeout; a stuck ffmpeg is killed via kill_on_drop
const ENCODE_TIMEOUT_SECS: u64 = 300;

/// Encoder output parameters
#[derive(Debug, Clone, Copy)]
pub struct EncodeSpec {
    /// Output height in pixels; width follows the aspect ratio
    pub height: u32,
    /// Output frame rate
    pub fps: u32,
}

/// Assembles an ordered frame sequence into a video file
#[async_trait]
pub trait Encode: Send + Sync {
    /// Encode `frames` (ascending timestamp order) into `output`
    async fn encode(&self, frames: &[PathBuf], spec: EncodeSpec, output: &Path) -> Result<()>;
}

/// Production encoder: ffmpeg concat demuxer + libx264
pub struct FfmpegEncoder;

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self
    }

    async fn run_ffmpeg(list_path: &Path, spec: EncodeSpec, output: &Path) -> Result<()> {
        let child = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
            ])
            .arg(list_path)
            .args([
                "-vf",
                &format!("scale=-2:{}", spec.height),
                "-r",
                &spec.fps.to_string(),
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-crf",
                "23",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(output)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Encode(format!("ffmpeg spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(ENCODE_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Err(Error::Encode(format!("ffmpeg failed: {}", stderr.trim())))
            }
            Ok(Err(e)) => Err(Error::Encode(format!("ffmpeg execution failed: {}", e))),
            Err(_) => Err(Error::Encode(format!(
                "ffmpeg timeout ({}s), process killed",
                ENCODE_TIMEOUT_SECS
            ))),
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encode for FfmpegEncoder {
    async fn encode(&self, frames: &[PathBuf], spec: EncodeSpec, output: &Path) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Encode("no frames to encode".to_string()));
        }

        // Concat demuxer input list, one absolute path per line
        let mut list = String::new();
        for frame in frames {
            let absolute = if frame.is_absolute() {
                frame.clone()
            } else {
                std::env::current_dir()?.join(frame)
            };
            list.push_str(&format!("file '{}'\n", absolute.display()));
        }

        let list_path = output.with_extension("list");
        fs::write(&list_path, &list).await?;

        let result = Self::run_ffmpeg(&list_path, spec, output).await;

        // List file is scratch either way
        let _ = fs::remove_file(&list_path).await;

        result?;

        // ffmpeg can exit zero without producing output on pathological input
        if !fs::try_exists(output).await.unwrap_or(false) {
            return Err(Error::Encode(format!(
                "ffmpeg produced no output at {}",
                output.display()
            )));
        }

        tracing::info!(
            output = %output.display(),
            frames = frames.len(),
            fps = spec.fps,
            height = spec.height,
            "Video encoded"
        );
        Ok(())
    }
}
