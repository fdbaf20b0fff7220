//! Clip search: preprocess → embed → match → align → resolve.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::align::AlignmentEngine;
use crate::embed::Embedder;
use crate::error::Result;
use crate::matcher::VectorMatcher;
use crate::media::MediaExtractor;
use crate::store::{MetadataStore, VectorFileStore};
use crate::types::SearchResult;

pub struct SearchService {
    store: Arc<MetadataStore>,
    vectors: Arc<VectorFileStore>,
    extractor: Arc<dyn MediaExtractor>,
    embedder: Arc<dyn Embedder>,
    matcher: VectorMatcher,
    alignment: AlignmentEngine,
    temp_dir: PathBuf,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MetadataStore>,
        vectors: Arc<VectorFileStore>,
        extractor: Arc<dyn MediaExtractor>,
        embedder: Arc<dyn Embedder>,
        matcher: VectorMatcher,
        alignment: AlignmentEngine,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            vectors,
            extractor,
            embedder,
            matcher,
            alignment,
            temp_dir: temp_dir.into(),
        }
    }

    /// Search the index for a clip on disk. The normalized WAV is deleted
    /// on every exit path.
    pub async fn search_file(&self, clip_path: &Path) -> Result<SearchResult> {
        let prepared = self
            .extractor
            .prepare_query(clip_path, &self.temp_dir)
            .await?;

        let outcome = self.search_prepared(&prepared).await;
        let _ = std::fs::remove_file(&prepared);
        outcome
    }

    async fn search_prepared(&self, wav_path: &Path) -> Result<SearchResult> {
        let batch = self.embedder.embed(wav_path, 0.0).await?;
        if batch.vectors.is_empty() {
            return Ok(SearchResult::not_found(
                "No embeddings generated for query clip",
            ));
        }

        let (db_vectors, db_ids) = self.vectors.load()?;
        if db_vectors.is_empty() || db_ids.is_empty() {
            return Ok(SearchResult::not_found("Vector index is empty"));
        }

        let matches = self
            .matcher
            .top_matches(&batch.vectors, &db_vectors, &db_ids)?;
        let alignment = self
            .alignment
            .align(&matches.neighbor_ids, &batch.timestamps)?;

        let Some(video_id) = alignment.video_id.filter(|_| alignment.found) else {
            return Ok(SearchResult::not_found(
                alignment
                    .reason
                    .unwrap_or_else(|| "No aligned match found".into()),
            ));
        };

        let Some((video_id, video_url, title, streamer)) =
            self.store.get_video_with_creator(video_id)?
        else {
            return Ok(SearchResult::not_found("Aligned video metadata not found"));
        };

        info!(
            video_id,
            timestamp = ?alignment.timestamp_seconds,
            score = ?alignment.score,
            "clip matched"
        );
        Ok(SearchResult {
            found: true,
            streamer: Some(streamer),
            video_id: Some(video_id),
            video_url: Some(video_url),
            title: Some(title),
            timestamp_seconds: alignment.timestamp_seconds,
            score: alignment.score,
            reason: alignment.reason,
        })
    }
}
