//! Application state
//!
//! The process-wide dependency container built once at startup and passed
//! to every handler. Nothing in here is a global: handlers receive the
//! container through axum's `State` extractor.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use vodhound_lib::align::{AlignmentConfig, AlignmentEngine};
use vodhound_lib::embed::{CommandEmbedder, Embedder};
use vodhound_lib::error::Result;
use vodhound_lib::matcher::VectorMatcher;
use vodhound_lib::media::{CommandExtractor, MediaExtractor};
use vodhound_lib::monitor::MonitorSupervisor;
use vodhound_lib::search::SearchService;
use vodhound_lib::store::{MetadataStore, VectorFileStore};
use vodhound_lib::twitch::{HelixClient, TwitchApi};

use crate::config::ServerConfig;

pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<MetadataStore>,
    pub vectors: Arc<VectorFileStore>,
    pub monitor: MonitorSupervisor,
    pub search: SearchService,
    pub upload_dir: PathBuf,
}

impl AppState {
    /// Production wiring: Helix credentials from the environment, sidecar
    /// embedder, ffmpeg/yt-dlp extractor.
    pub fn initialize(config: ServerConfig) -> Result<Self> {
        let twitch: Arc<dyn TwitchApi> = Arc::new(HelixClient::from_env()?);
        let embedder: Arc<dyn Embedder> =
            Arc::new(CommandEmbedder::new(config.embedder_command.clone())?);
        let extractor: Arc<dyn MediaExtractor> = Arc::new(CommandExtractor);
        Self::with_collaborators(config, twitch, embedder, extractor)
    }

    /// Wiring with injectable collaborators, used by tests.
    pub fn with_collaborators(
        config: ServerConfig,
        twitch: Arc<dyn TwitchApi>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn MediaExtractor>,
    ) -> Result<Self> {
        let layout = config.layout();
        layout.ensure_dirs()?;

        let store = Arc::new(MetadataStore::open(&layout.metadata_db())?);
        let vectors = Arc::new(VectorFileStore::new(
            layout.vector_file(),
            layout.id_file(),
        ));

        report_unindexed(&store, &vectors);

        let monitor = MonitorSupervisor::new(
            store.clone(),
            vectors.clone(),
            embedder.clone(),
            twitch,
            extractor.clone(),
            config.monitor.clone(),
            config.ingest.clone(),
            layout.live_chunk_dir(),
        );

        let search = SearchService::new(
            store.clone(),
            vectors.clone(),
            extractor,
            embedder,
            VectorMatcher::new(config.search.top_k),
            AlignmentEngine::new(
                store.clone(),
                AlignmentConfig {
                    min_vote_count: config.search.min_vote_count,
                    min_vote_ratio: config.search.min_vote_ratio,
                },
            ),
            layout.search_temp_dir(),
        );

        Ok(Self {
            upload_dir: layout.upload_temp_dir(),
            config,
            store,
            vectors,
            monitor,
            search,
        })
    }
}

/// Fingerprint rows past the committed vector count are unindexed — the
/// residue of a crash between the fingerprint commit and the vector append.
/// Re-ingesting the window fills the gap; until then, searches just cannot
/// land on those seconds.
fn report_unindexed(store: &MetadataStore, vectors: &VectorFileStore) {
    let check = || -> Result<u64> {
        let rows = vectors.row_count()?;
        let max_id = store.max_fingerprint_id()?.unwrap_or(0);
        Ok((max_id as u64).saturating_sub(rows))
    };
    match check() {
        Ok(0) => {}
        Ok(unindexed) => warn!(unindexed, "fingerprint rows without vectors detected"),
        Err(err) => warn!(%err, "vector index consistency check failed"),
    }
}
