//! Core value types shared across the ingest and search subsystems.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One extracted window of normalized audio, ready for the embedder.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Path to a 16 kHz mono WAV on disk
    pub path: PathBuf,
    /// Absolute offset of the first sample within the archive
    pub offset_seconds: f64,
    /// Window length in seconds
    pub duration_seconds: f64,
}

/// A relational video row.
#[derive(Debug, Clone)]
pub struct Video {
    pub id: i64,
    pub creator_id: i64,
    pub url: String,
    pub title: String,
    pub processed: bool,
}

/// Latest-archive metadata reported by the platform adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveVideo {
    /// Platform-side VOD id (stringly typed by Helix)
    pub id: String,
    /// Canonical watch URL
    pub url: String,
    pub title: String,
    /// Total recorded duration as currently reported; grows while live
    pub duration_seconds: u64,
    /// RFC 3339 creation time, used to pick the newest archive
    pub created_at: String,
}

/// Persisted follower cursor for one platform VOD.
#[derive(Debug, Clone)]
pub struct LiveIngestState {
    pub vod_platform_id: String,
    pub video_id: i64,
    pub streamer: String,
    pub last_ingested_seconds: u64,
    pub last_seen_duration_seconds: u64,
    pub updated_at: String,
}

/// One resolved fingerprint row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerprintRow {
    pub id: i64,
    pub video_id: i64,
    pub timestamp_seconds: f64,
}

/// Row of the live-sessions listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSessionRow {
    pub video_id: i64,
    pub creator_name: String,
    pub url: String,
    pub title: String,
    pub processed: bool,
}

/// Outcome of the temporal alignment vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub found: bool,
    pub video_id: Option<i64>,
    pub timestamp_seconds: Option<i64>,
    pub score: Option<f32>,
    pub reason: Option<String>,
}

impl AlignmentResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            found: false,
            video_id: None,
            timestamp_seconds: None,
            score: None,
            reason: Some(reason.into()),
        }
    }
}

/// Final search answer, resolved against video and creator metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub found: bool,
    pub streamer: Option<String>,
    pub video_id: Option<i64>,
    pub video_url: Option<String>,
    pub title: Option<String>,
    pub timestamp_seconds: Option<i64>,
    pub score: Option<f32>,
    pub reason: Option<String>,
}

impl SearchResult {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            found: false,
            streamer: None,
            video_id: None,
            video_url: None,
            title: None,
            timestamp_seconds: None,
            score: None,
            reason: Some(reason.into()),
        }
    }
}

/// Dense row-major f32 matrix of per-second embeddings.
///
/// Row `i` of a store-loaded matrix corresponds to entry `i` of the parallel
/// fingerprint-id vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl EmbeddingMatrix {
    pub fn new(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            dim,
        }
    }

    /// Build from equally sized rows. Fails on ragged input.
    pub fn from_rows(rows: &[Vec<f32>]) -> Option<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != dim) {
            return None;
        }
        let mut m = Self::new(dim);
        for row in rows {
            m.push_row(row)?;
        }
        Some(m)
    }

    pub fn from_raw(data: Vec<f32>, rows: usize, dim: usize) -> Option<Self> {
        if data.len() != rows * dim {
            return None;
        }
        Some(Self { data, rows, dim })
    }

    pub fn push_row(&mut self, row: &[f32]) -> Option<()> {
        if row.len() != self.dim {
            return None;
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Some(())
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Embedder output: one vector and one absolute timestamp per second.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: EmbeddingMatrix,
    pub timestamps: Vec<f32>,
}

/// Monitor supervisor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Polling,
    Ingesting,
    Error,
}

/// Snapshot of the monitor supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub streamer: Option<String>,
    pub is_live: Option<bool>,
    pub started_at: Option<String>,
    pub last_check_at: Option<String>,
    pub last_error: Option<String>,
    pub current_video_id: Option<i64>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Idle,
            streamer: None,
            is_live: None,
            started_at: None,
            last_check_at: None,
            last_error: None,
            current_video_id: None,
        }
    }
}
