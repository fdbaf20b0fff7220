//! Audio sources feeding the ingest session.

mod archive;

pub use archive::ArchiveFollower;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AudioChunk;

/// A producer of ordered audio chunks.
///
/// `next_chunk` returning `None` means nothing is ready yet; the caller
/// polls again unless `is_finished` reports the source is drained for good.
#[async_trait]
pub trait AudioSource: Send {
    /// Prepare the source (create work dirs, first platform refresh).
    async fn start(&mut self) -> Result<()>;

    /// Return the next available chunk, or `None` if nothing is ready.
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;

    /// Clean shutdown and resource cleanup.
    async fn stop(&mut self) -> Result<()>;

    /// True once the source will never produce more chunks.
    fn is_finished(&self) -> bool;

    /// Relational video row the chunks belong to, once known.
    fn video_id(&self) -> Option<i64>;
}
