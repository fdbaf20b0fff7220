use thiserror::Error;

/// Main error type for the vodhound core
#[derive(Error, Debug)]
pub enum HuntError {
    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The relational store was unreachable or a statement failed
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A Twitch Helix call failed (network, auth, or payload shape)
    #[error("Twitch API error: {0}")]
    Twitch(String),

    /// Media extraction (yt-dlp / ffmpeg) failed after the retry
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The embedder sidecar failed or returned a malformed batch
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The dense vector files are inconsistent with each other or the db
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Caller-supplied input was rejected before any work started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The single monitor slot is occupied by another streamer
    #[error("Monitor conflict: {0}")]
    MonitorConflict(String),

    /// Search attempted while the monitor is not idle
    #[error("Search unavailable: {0}")]
    SearchBusy(String),

    /// Fatal configuration problem (missing credentials, bad paths)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HuntError {
    /// Whether the supervisor should retry after a back-off rather than
    /// surface the failure to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HuntError::Io(_)
                | HuntError::Storage(_)
                | HuntError::Twitch(_)
                | HuntError::Extraction(_)
                | HuntError::Embedding(_)
                | HuntError::VectorIndex(_)
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HuntError>;
