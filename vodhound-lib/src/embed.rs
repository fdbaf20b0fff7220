//! The audio embedder seam.
//!
//! The model itself is an external collaborator: the production
//! implementation runs a configured sidecar command that reads a 16 kHz
//! mono WAV and prints one JSON batch on stdout:
//!
//! ```json
//! {"vectors": [[0.1, ...], ...], "timestamps": [0.0, 1.0, ...]}
//! ```
//!
//! Timestamps are absolute: the sidecar adds the offset it was given, so a
//! chunk of length L starting at `offset` labels its rows
//! `[offset, offset+1, ..., offset+L-1]`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{HuntError, Result};
use crate::types::{EmbeddingBatch, EmbeddingMatrix};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every second of the WAV at `path`, labeling timestamps with
    /// `offset_seconds` added.
    async fn embed(&self, path: &Path, offset_seconds: f64) -> Result<EmbeddingBatch>;
}

/// Runs a configured command (`argv[0] argv[1..] <wav> <offset>`) and
/// parses the JSON batch it prints.
#[derive(Debug)]
pub struct CommandEmbedder {
    argv: Vec<String>,
}

#[derive(Deserialize)]
struct WireBatch {
    vectors: Vec<Vec<f32>>,
    timestamps: Vec<f32>,
}

impl CommandEmbedder {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(HuntError::Config("embedder command is empty".into()));
        }
        Ok(Self { argv })
    }

    fn parse_batch(stdout: &[u8]) -> Result<EmbeddingBatch> {
        let wire: WireBatch = serde_json::from_slice(stdout)
            .map_err(|e| HuntError::Embedding(format!("embedder output malformed: {e}")))?;

        if wire.vectors.len() != wire.timestamps.len() {
            return Err(HuntError::Embedding(format!(
                "embedder returned {} vectors but {} timestamps",
                wire.vectors.len(),
                wire.timestamps.len()
            )));
        }

        let vectors = EmbeddingMatrix::from_rows(&wire.vectors)
            .ok_or_else(|| HuntError::Embedding("embedder returned ragged vectors".into()))?;

        Ok(EmbeddingBatch {
            vectors,
            timestamps: wire.timestamps,
        })
    }
}

#[async_trait]
impl Embedder for CommandEmbedder {
    async fn embed(&self, path: &Path, offset_seconds: f64) -> Result<EmbeddingBatch> {
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(path)
            .arg(offset_seconds.to_string())
            .output()
            .await
            .map_err(|e| {
                HuntError::Embedding(format!("failed to spawn embedder {}: {e}", self.argv[0]))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HuntError::Embedding(format!(
                "embedder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let batch = Self::parse_batch(&output.stdout)?;
        debug!(
            path = %path.display(),
            offset_seconds,
            rows = batch.vectors.rows(),
            "embedded chunk"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_parses_and_keeps_offsets() {
        let json = br#"{"vectors": [[0.1, 0.2], [0.3, 0.4]], "timestamps": [30.0, 31.0]}"#;
        let batch = CommandEmbedder::parse_batch(json).unwrap();
        assert_eq!(batch.vectors.rows(), 2);
        assert_eq!(batch.vectors.dim(), 2);
        assert_eq!(batch.timestamps, vec![30.0, 31.0]);
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        let json = br#"{"vectors": [[0.1, 0.2], [0.3]], "timestamps": [0.0, 1.0]}"#;
        assert!(matches!(
            CommandEmbedder::parse_batch(json).unwrap_err(),
            HuntError::Embedding(_)
        ));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let json = br#"{"vectors": [[0.1]], "timestamps": [0.0, 1.0]}"#;
        assert!(matches!(
            CommandEmbedder::parse_batch(json).unwrap_err(),
            HuntError::Embedding(_)
        ));
    }

    #[test]
    fn empty_command_is_a_config_error() {
        assert!(matches!(
            CommandEmbedder::new(Vec::new()).unwrap_err(),
            HuntError::Config(_)
        ));
    }
}
