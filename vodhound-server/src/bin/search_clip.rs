//! One-shot clip search against an existing on-disk index.
//!
//! Thin CLI wrapper over the core search service; prints the result as
//! JSON so it can be piped.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vodhound_lib::align::{AlignmentConfig, AlignmentEngine};
use vodhound_lib::config::{DataLayout, SearchConfig};
use vodhound_lib::embed::CommandEmbedder;
use vodhound_lib::matcher::VectorMatcher;
use vodhound_lib::media::CommandExtractor;
use vodhound_lib::search::SearchService;
use vodhound_lib::store::{MetadataStore, VectorFileStore};

#[derive(Parser)]
#[command(name = "search-clip", about = "Search the fingerprint index for a clip")]
struct Args {
    /// Audio or video clip to look up
    clip: PathBuf,

    /// Data directory holding metadata.db and the vector files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Embedder sidecar command (WAV path and offset are appended)
    #[arg(long, default_value = "vodhound-embedder", num_args = 1..)]
    embedder: Vec<String>,

    /// Nearest neighbors kept per query second
    #[arg(long, default_value_t = SearchConfig::default().top_k)]
    top_k: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vodhound_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let layout = DataLayout::new(&args.data_dir);
    let search_config = SearchConfig::default();

    let store = Arc::new(MetadataStore::open(&layout.metadata_db())?);
    let vectors = Arc::new(VectorFileStore::new(layout.vector_file(), layout.id_file()));

    let service = SearchService::new(
        store.clone(),
        vectors,
        Arc::new(CommandExtractor),
        Arc::new(CommandEmbedder::new(args.embedder)?),
        VectorMatcher::new(args.top_k),
        AlignmentEngine::new(
            store,
            AlignmentConfig {
                min_vote_count: search_config.min_vote_count,
                min_vote_ratio: search_config.min_vote_ratio,
            },
        ),
        layout.search_temp_dir(),
    );

    let result = service.search_file(&args.clip).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.found {
        std::process::exit(1);
    }
    Ok(())
}
