//! # Vodhound core
//!
//! `vodhound-lib` locates short audio clips inside previously ingested
//! Twitch broadcast archives. It owns the two subsystems that make that
//! work:
//!
//! - **Live-archive ingest** — [`source::ArchiveFollower`] follows a growing
//!   broadcast archive at a safe lag, [`ingest::IngestSession`] drives it
//!   through the embedder into the stores, and [`monitor::MonitorSupervisor`]
//!   keeps exactly one of those pipelines alive per process.
//! - **Fingerprint search** — [`matcher::VectorMatcher`] scores a query
//!   against the dense index and [`align::AlignmentEngine`] turns the
//!   per-second neighbors into a single (video, timestamp) answer.
//!
//! The embedding model, the Twitch Helix API, and the `ffmpeg`/`yt-dlp`
//! extractors are external collaborators behind the [`embed::Embedder`],
//! [`twitch::TwitchApi`], and [`media::MediaExtractor`] traits.
//!
//! If you are serving this from an async HTTP frontend, hold the
//! supervisor and [`search::SearchService`] in a shared state container and
//! gate searches on [`monitor::MonitorSupervisor::can_search`]: the vector
//! files have a single writer by construction.

pub mod align;
pub mod config;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod media;
pub mod monitor;
pub mod search;
pub mod source;
pub mod store;
pub mod twitch;
pub mod types;

pub use error::{HuntError, Result};
pub use types::{
    AlignmentResult, AudioChunk, EmbeddingBatch, EmbeddingMatrix, MonitorState, MonitorStatus,
    SearchResult,
};
