//! Server configuration
//!
//! Loaded from a TOML file when one is present; every field has a default
//! so a partial file (or none at all) works.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use vodhound_lib::config::{DataLayout, IngestConfig, MonitorConfig, SearchConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Root of the persisted state (db, vector files, temp dirs)
    pub data_dir: PathBuf,

    /// Embedder sidecar command; the WAV path and offset are appended
    pub embedder_command: Vec<String>,

    /// Archive-follower tuning
    pub ingest: IngestConfig,

    /// Monitor supervisor tuning
    pub monitor: MonitorConfig,

    /// Search and alignment tuning
    pub search: SearchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            data_dir: PathBuf::from("data"),
            embedder_command: vec!["vodhound-embedder".to_string()],
            ingest: IngestConfig::default(),
            monitor: MonitorConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("cannot parse {}: {e}", path.display()))
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 9999

            [ingest]
            chunk_seconds = 30
            lag_seconds = 120
            poll_seconds = 15.0
            finalize_checks = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9999);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.ingest.chunk_seconds, 30);
        assert_eq!(config.search.top_k, 10);
        assert_eq!(config.socket_addr(), "127.0.0.1:9999");
    }
}
