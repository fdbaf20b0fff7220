//! Media extraction via the `yt-dlp` and `ffmpeg` CLIs.
//!
//! Everything the pipeline consumes is normalized to 16 kHz mono WAV here.
//! The trait exists so the follower and search tests can substitute fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::error::{HuntError, Result};

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Resolve an archive watch URL to a directly fetchable media URL.
    async fn resolve_media_url(&self, archive_url: &str) -> Result<String>;

    /// Cut `[start, start+duration)` out of a media URL into a 16 kHz mono
    /// WAV at `output`. The output must exist and be non-empty on success.
    async fn extract_window(
        &self,
        media_url: &str,
        start_seconds: u64,
        duration_seconds: u64,
        output: &Path,
    ) -> Result<()>;

    /// Normalize an uploaded clip (audio or video) into a 16 kHz mono WAV
    /// inside `temp_dir`, returning the new path.
    async fn prepare_query(&self, clip: &Path, temp_dir: &Path) -> Result<PathBuf>;
}

/// Production extractor shelling out to `yt-dlp` and `ffmpeg`.
pub struct CommandExtractor;

#[async_trait]
impl MediaExtractor for CommandExtractor {
    async fn resolve_media_url(&self, archive_url: &str) -> Result<String> {
        let output = Command::new("yt-dlp")
            .arg("-g")
            .arg(archive_url)
            .output()
            .await
            .map_err(|e| HuntError::Extraction(format!("failed to spawn yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HuntError::Extraction(format!(
                "yt-dlp failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let media_url = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| HuntError::Extraction("yt-dlp returned no media URL".into()))?;

        debug!(archive_url, "resolved media url");
        Ok(media_url.to_string())
    }

    async fn extract_window(
        &self,
        media_url: &str,
        start_seconds: u64,
        duration_seconds: u64,
        output: &Path,
    ) -> Result<()> {
        if duration_seconds == 0 {
            return Err(HuntError::Extraction(
                "duration_seconds must be positive".into(),
            ));
        }

        let result = Command::new("ffmpeg")
            .args(["-loglevel", "error"])
            .args(["-ss", &start_seconds.to_string()])
            .args(["-i", media_url])
            .args(["-t", &duration_seconds.to_string()])
            .args(["-ar", &TARGET_SAMPLE_RATE.to_string()])
            .args(["-ac", "1"])
            .arg("-y")
            .arg(output)
            .output()
            .await
            .map_err(|e| HuntError::Extraction(format!("failed to spawn ffmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let message = stderr.trim();
            return Err(HuntError::Extraction(if message.is_empty() {
                "ffmpeg failed".into()
            } else {
                message.to_string()
            }));
        }

        ensure_non_empty(output)?;
        Ok(())
    }

    async fn prepare_query(&self, clip: &Path, temp_dir: &Path) -> Result<PathBuf> {
        if !clip.exists() {
            return Err(HuntError::InvalidInput(format!(
                "query clip not found: {}",
                clip.display()
            )));
        }
        std::fs::create_dir_all(temp_dir)?;

        let output = temp_dir.join(format!("query_{}.wav", uuid::Uuid::new_v4().simple()));
        let result = Command::new("ffmpeg")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(clip)
            .args(["-ar", &TARGET_SAMPLE_RATE.to_string()])
            .args(["-ac", "1"])
            .arg("-y")
            .arg(&output)
            .output()
            .await
            .map_err(|e| HuntError::Extraction(format!("failed to spawn ffmpeg: {e}")))?;

        if !result.status.success() || !output.exists() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let message = stderr.trim();
            return Err(HuntError::Extraction(if message.is_empty() {
                "ffmpeg failed to preprocess query".into()
            } else {
                message.to_string()
            }));
        }

        Ok(output)
    }
}

fn ensure_non_empty(path: &Path) -> Result<()> {
    let len = path.metadata().map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(HuntError::Extraction(
            "extracted chunk is missing or empty".into(),
        ));
    }
    Ok(())
}
