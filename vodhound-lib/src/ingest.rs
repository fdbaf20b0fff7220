//! The ingest session: drives a source → embedder → store loop.
//!
//! Per-chunk work is strictly sequential: embed, insert fingerprint rows,
//! append vectors. Only then is `next_chunk` called again, which lets the
//! source commit the previous window's cursor knowing downstream succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::embed::Embedder;
use crate::error::{HuntError, Result};
use crate::source::AudioSource;
use crate::store::{MetadataStore, VectorFileStore};

pub struct IngestSession {
    source: tokio::sync::Mutex<Box<dyn AudioSource>>,
    embedder: Arc<dyn Embedder>,
    meta: Arc<MetadataStore>,
    vectors: Arc<VectorFileStore>,
    poll_interval: Duration,
    running: AtomicBool,
}

impl IngestSession {
    pub fn new(
        source: Box<dyn AudioSource>,
        embedder: Arc<dyn Embedder>,
        meta: Arc<MetadataStore>,
        vectors: Arc<VectorFileStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source: tokio::sync::Mutex::new(source),
            embedder,
            meta,
            vectors,
            poll_interval,
            running: AtomicBool::new(false),
        }
    }

    /// Run until the source is drained or `stop()` is called. The source is
    /// stopped on every exit path. Returns the video id the session fed.
    pub async fn run(&self) -> Result<Option<i64>> {
        self.running.store(true, Ordering::SeqCst);

        let mut source = self.source.lock().await;
        source.start().await?;

        let outcome = self.drive(source.as_mut()).await;
        let video_id = source.video_id();
        let _ = source.stop().await;

        outcome.map(|_| video_id)
    }

    async fn drive(&self, source: &mut dyn AudioSource) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            let Some(chunk) = source.next_chunk().await? else {
                if source.is_finished() {
                    info!("audio source drained");
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };

            let batch = self
                .embedder
                .embed(&chunk.path, chunk.offset_seconds)
                .await?;
            if batch.timestamps.is_empty() {
                continue;
            }

            let video_id = source.video_id().ok_or_else(|| {
                HuntError::Extraction("source produced a chunk before adopting a video".into())
            })?;

            let timestamps: Vec<f64> = batch.timestamps.iter().map(|&t| t as f64).collect();
            let ids = self.meta.store_fingerprints(video_id, &timestamps)?;
            self.vectors.append(&batch.vectors, &ids)?;

            debug!(
                video_id,
                offset = chunk.offset_seconds,
                seconds = ids.len(),
                "ingested window"
            );
        }
        Ok(())
    }

    /// Request a clean stop; the loop exits at the next safe point.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioChunk, EmbeddingBatch, EmbeddingMatrix};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct ScriptedSource {
        chunks: Mutex<Vec<AudioChunk>>,
        video_id: i64,
        stopped: Arc<AtomicBool>,
        finished: AtomicBool,
        finish_when_empty: bool,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<AudioChunk>, video_id: i64, stopped: Arc<AtomicBool>) -> Self {
            Self {
                chunks: Mutex::new(chunks),
                video_id,
                stopped,
                finished: AtomicBool::new(false),
                finish_when_empty: true,
            }
        }

        /// A source that idles forever once drained, like a quiet live tail.
        fn endless(video_id: i64, stopped: Arc<AtomicBool>) -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                video_id,
                stopped,
                finished: AtomicBool::new(false),
                finish_when_empty: false,
            }
        }
    }

    #[async_trait]
    impl AudioSource for ScriptedSource {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.is_empty() {
                if self.finish_when_empty {
                    self.finished.store(true, Ordering::SeqCst);
                }
                return Ok(None);
            }
            Ok(Some(chunks.remove(0)))
        }

        async fn stop(&mut self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }

        fn video_id(&self) -> Option<i64> {
            Some(self.video_id)
        }
    }

    /// One unit vector per second, labeled `[offset, offset+1, ...]`.
    struct StubEmbedder {
        offsets_seen: Arc<Mutex<Vec<f64>>>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _path: &Path, offset_seconds: f64) -> Result<EmbeddingBatch> {
            self.offsets_seen.lock().unwrap().push(offset_seconds);
            let seconds = 2usize;
            let rows: Vec<Vec<f32>> = (0..seconds)
                .map(|i| vec![(offset_seconds as f32) + i as f32, 1.0])
                .collect();
            Ok(EmbeddingBatch {
                vectors: EmbeddingMatrix::from_rows(&rows).unwrap(),
                timestamps: (0..seconds)
                    .map(|i| offset_seconds as f32 + i as f32)
                    .collect(),
            })
        }
    }

    fn chunk(offset: f64) -> AudioChunk {
        AudioChunk {
            path: PathBuf::from("/nonexistent.wav"),
            offset_seconds: offset,
            duration_seconds: 2.0,
        }
    }

    fn session_parts(tmp: &Path) -> (Arc<MetadataStore>, Arc<VectorFileStore>, i64) {
        let meta = Arc::new(MetadataStore::in_memory().unwrap());
        let creator = meta
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        let video = meta
            .create_video(creator, "https://www.twitch.tv/videos/1", "Stream", false)
            .unwrap();
        let vectors = Arc::new(VectorFileStore::new(
            tmp.join("vectors.bin"),
            tmp.join("ids.bin"),
        ));
        (meta, vectors, video)
    }

    #[tokio::test]
    async fn session_persists_fingerprints_and_vectors_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let (meta, vectors, video) = session_parts(tmp.path());

        let stopped = Arc::new(AtomicBool::new(false));
        let offsets_seen = Arc::new(Mutex::new(Vec::new()));
        let session = IngestSession::new(
            Box::new(ScriptedSource::new(
                vec![chunk(0.0), chunk(2.0)],
                video,
                stopped.clone(),
            )),
            Arc::new(StubEmbedder {
                offsets_seen: offsets_seen.clone(),
            }),
            meta.clone(),
            vectors.clone(),
            Duration::from_millis(1),
        );

        let fed = session.run().await.unwrap();
        assert_eq!(fed, Some(video));
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(*offsets_seen.lock().unwrap(), vec![0.0, 2.0]);

        let (matrix, ids) = vectors.load().unwrap();
        assert_eq!(matrix.rows(), 4);
        assert_eq!(ids.len(), 4);

        let rows = meta.get_fingerprint_rows(&ids).unwrap();
        let mut timestamps: Vec<f64> = rows.iter().map(|r| r.timestamp_seconds).collect();
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(timestamps, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn stop_exits_the_loop_and_stops_the_source() {
        let tmp = tempfile::tempdir().unwrap();
        let (meta, vectors, video) = session_parts(tmp.path());

        let stopped = Arc::new(AtomicBool::new(false));
        let session = Arc::new(IngestSession::new(
            Box::new(ScriptedSource::endless(video, stopped.clone())),
            Arc::new(StubEmbedder {
                offsets_seen: Arc::new(Mutex::new(Vec::new())),
            }),
            meta,
            vectors,
            Duration::from_millis(5),
        ));

        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        tokio::time::sleep(Duration::from_millis(25)).await;
        session.stop();

        let outcome = runner.await.unwrap().unwrap();
        assert_eq!(outcome, Some(video));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn source_is_stopped_even_when_the_store_rejects_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let (meta, vectors, _) = session_parts(tmp.path());

        // Prime the files with a different dimension so the vector append
        // fails mid-window.
        vectors
            .append(
                &EmbeddingMatrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap(),
                &[999],
            )
            .unwrap();

        let stopped = Arc::new(AtomicBool::new(false));
        let session = IngestSession::new(
            Box::new(ScriptedSource::new(vec![chunk(0.0)], 1, stopped.clone())),
            Arc::new(StubEmbedder {
                offsets_seen: Arc::new(Mutex::new(Vec::new())),
            }),
            meta,
            vectors,
            Duration::from_millis(1),
        );

        assert!(session.run().await.is_err());
        assert!(stopped.load(Ordering::SeqCst));
    }
}
