//! Core configuration sections
//!
//! Each subsystem gets its own serde section with defaults matching the
//! tuning the ingest pipeline was calibrated with. The server crate embeds
//! these into its TOML config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Archive-follower tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Window length requested from the archive per extraction
    pub chunk_seconds: u64,

    /// Safety margin never read within this many seconds of a live tail
    pub lag_seconds: u64,

    /// Minimum interval between platform refreshes
    pub poll_seconds: f64,

    /// Consecutive no-growth offline polls required to finalize
    pub finalize_checks: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 60,
            lag_seconds: 120,
            poll_seconds: 15.0,
            finalize_checks: 3,
        }
    }
}

/// Monitor supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between liveness polls while nobody is live
    pub poll_seconds: f64,

    /// Back-off after a transient check or session error
    pub retry_seconds: f64,

    /// Session sleep when the source has no chunk ready
    pub session_poll_interval: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 30.0,
            retry_seconds: 5.0,
            session_poll_interval: 0.5,
        }
    }
}

/// Search and alignment tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Nearest neighbors kept per query second
    pub top_k: usize,

    /// Minimum votes on the best (video, offset) bucket
    pub min_vote_count: u32,

    /// Minimum best-bucket votes divided by query seconds
    pub min_vote_ratio: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_vote_count: 3,
            min_vote_ratio: 0.08,
        }
    }
}

/// On-disk layout rooted at a single data directory
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn metadata_db(&self) -> PathBuf {
        self.root.join("metadata.db")
    }

    pub fn vector_file(&self) -> PathBuf {
        self.root.join("vectors.bin")
    }

    pub fn id_file(&self) -> PathBuf {
        self.root.join("ids.bin")
    }

    pub fn live_chunk_dir(&self) -> PathBuf {
        self.root.join("temp_live_chunks")
    }

    pub fn search_temp_dir(&self) -> PathBuf {
        self.root.join("temp_search")
    }

    pub fn upload_temp_dir(&self) -> PathBuf {
        self.root.join("temp_search_uploads")
    }

    /// Create the data root and every ephemeral work directory.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.root.as_path(),
            &self.live_chunk_dir(),
            &self.search_temp_dir(),
            &self.upload_temp_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new(Path::new("data"))
    }
}
