//! Lag-aware follower of a growing broadcast archive.
//!
//! The follower never reads within `lag_seconds` of a live archive's tail,
//! persists its cursor through `live_ingest_state`, and survives restarts:
//! re-adopting a VOD picks the cursor back up from the store, so at most
//! the last uncommitted window is re-processed.
//!
//! The commit protocol is deliberately one call behind: a window returned
//! from `next_chunk` is only committed (cursor advance + chunk file delete)
//! at the top of the *next* call, by which point the caller has drained it
//! downstream. Progress becomes durable only after downstream success.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{HuntError, Result};
use crate::media::MediaExtractor;
use crate::source::AudioSource;
use crate::store::MetadataStore;
use crate::twitch::{normalize_login, TwitchApi};
use crate::types::{ArchiveVideo, AudioChunk};

const MEDIA_URL_TTL: Duration = Duration::from_secs(60);

pub struct ArchiveFollower {
    streamer: String,
    store: Arc<MetadataStore>,
    twitch: Arc<dyn TwitchApi>,
    extractor: Arc<dyn MediaExtractor>,
    config: IngestConfig,
    temp_dir: PathBuf,

    video_id: Option<i64>,
    current_vod_url: Option<String>,
    ingest_cursor_seconds: u64,

    finished: bool,
    started: bool,

    user_id: Option<String>,
    vod_platform_id: Option<String>,
    vod_title: Option<String>,
    last_seen_duration_seconds: u64,
    last_is_live: Option<bool>,
    no_growth_checks: u32,
    last_refresh_at: Option<Instant>,

    pending_commit_end_seconds: Option<u64>,
    pending_chunk_path: Option<PathBuf>,

    media_url: Option<String>,
    media_url_resolved_at: Option<Instant>,
}

impl ArchiveFollower {
    pub fn new(
        streamer: &str,
        store: Arc<MetadataStore>,
        twitch: Arc<dyn TwitchApi>,
        extractor: Arc<dyn MediaExtractor>,
        config: IngestConfig,
        temp_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            streamer: normalize_login(streamer)?,
            store,
            twitch,
            extractor,
            config,
            temp_dir: temp_dir.into(),
            video_id: None,
            current_vod_url: None,
            ingest_cursor_seconds: 0,
            finished: false,
            started: false,
            user_id: None,
            vod_platform_id: None,
            vod_title: None,
            last_seen_duration_seconds: 0,
            last_is_live: None,
            no_growth_checks: 0,
            last_refresh_at: None,
            pending_commit_end_seconds: None,
            pending_chunk_path: None,
            media_url: None,
            media_url_resolved_at: None,
        })
    }

    pub fn ingest_cursor_seconds(&self) -> u64 {
        self.ingest_cursor_seconds
    }

    async fn refresh_state(&mut self, force: bool) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        if !force {
            if let Some(at) = self.last_refresh_at {
                if at.elapsed().as_secs_f64() < self.config.poll_seconds {
                    return Ok(());
                }
            }
        }
        self.last_refresh_at = Some(Instant::now());

        let is_live = self.twitch.is_live(&self.streamer).await?;
        self.last_is_live = Some(is_live);

        let user_id = match &self.user_id {
            Some(id) => id.clone(),
            None => {
                let id = self.twitch.get_user_id(&self.streamer).await?;
                self.user_id = Some(id.clone());
                id
            }
        };

        let Some(latest) = self.twitch.get_latest_archive(&user_id).await? else {
            return Ok(());
        };

        if self.vod_platform_id.as_deref() != Some(latest.id.as_str()) {
            self.switch_to_vod(&latest)?;
        }

        if latest.duration_seconds > self.last_seen_duration_seconds {
            self.last_seen_duration_seconds = latest.duration_seconds;
            self.no_growth_checks = 0;
        } else if !is_live {
            self.no_growth_checks += 1;
        }

        self.save_ingest_state()?;
        Ok(())
    }

    /// Adopt a (possibly resumed) VOD: ensure creator and video rows exist,
    /// reset `processed`, and pick up any persisted cursor.
    fn switch_to_vod(&mut self, vod: &ArchiveVideo) -> Result<()> {
        self.vod_platform_id = Some(vod.id.clone());
        self.current_vod_url = Some(vod.url.clone());
        self.vod_title = Some(if vod.title.is_empty() {
            format!("Live stream by {}", self.streamer)
        } else {
            vod.title.clone()
        });

        let creator_url = format!("https://twitch.tv/{}", self.streamer);
        let creator_id = self.store.create_or_get_creator(&self.streamer, &creator_url)?;

        let title = self.vod_title.as_deref().unwrap_or_default();
        match self.store.get_video_by_url(&vod.url)? {
            Some(existing) => {
                self.video_id = Some(existing.id);
                self.store.mark_video_processed(existing.id, false)?;
            }
            None => {
                self.video_id = Some(self.store.create_video(creator_id, &vod.url, title, false)?);
            }
        }

        match self.store.get_live_ingest_state(&vod.id)? {
            Some(state) => {
                self.ingest_cursor_seconds = state.last_ingested_seconds;
                self.last_seen_duration_seconds = state.last_seen_duration_seconds;
                info!(
                    vod = %vod.id,
                    cursor = self.ingest_cursor_seconds,
                    "resuming archive from persisted cursor"
                );
            }
            None => {
                self.ingest_cursor_seconds = 0;
            }
        }

        self.pending_commit_end_seconds = None;
        self.pending_chunk_path = None;
        self.media_url = None;
        self.media_url_resolved_at = None;
        self.no_growth_checks = 0;
        Ok(())
    }

    async fn extract_chunk(&mut self, start_seconds: u64, duration_seconds: u64) -> Result<PathBuf> {
        let platform_id = self
            .vod_platform_id
            .clone()
            .ok_or_else(|| HuntError::Extraction("no VOD adopted yet".into()))?;

        let output = self.temp_dir.join(format!(
            "vod_{platform_id}_{start_seconds:08}_{duration_seconds:04}.wav"
        ));

        let media_url = self.resolve_media_url().await?;
        let first = self
            .extractor
            .extract_window(&media_url, start_seconds, duration_seconds, &output)
            .await;

        if let Err(err) = first {
            // Stale CDN URLs are the common failure here: invalidate the
            // cache, re-resolve, and retry exactly once.
            warn!(%err, "chunk extraction failed, re-resolving media url");
            self.media_url = None;
            self.media_url_resolved_at = None;
            let media_url = self.resolve_media_url().await?;
            self.extractor
                .extract_window(&media_url, start_seconds, duration_seconds, &output)
                .await?;
        }

        Ok(output)
    }

    async fn resolve_media_url(&mut self) -> Result<String> {
        let vod_url = self
            .current_vod_url
            .clone()
            .ok_or_else(|| HuntError::Extraction("no VOD adopted yet".into()))?;

        if let (Some(url), Some(at)) = (&self.media_url, self.media_url_resolved_at) {
            if at.elapsed() < MEDIA_URL_TTL {
                return Ok(url.clone());
            }
        }

        let media_url = self.extractor.resolve_media_url(&vod_url).await?;
        self.media_url = Some(media_url.clone());
        self.media_url_resolved_at = Some(Instant::now());
        Ok(media_url)
    }

    /// Advance the cursor past the previously returned window, persist, and
    /// delete the drained chunk file.
    fn commit_pending_progress(&mut self) -> Result<()> {
        let Some(end) = self.pending_commit_end_seconds else {
            return Ok(());
        };
        if self.vod_platform_id.is_none() || self.video_id.is_none() {
            return Ok(());
        }

        self.ingest_cursor_seconds = end;
        self.pending_commit_end_seconds = None;
        self.save_ingest_state()?;

        if let Some(path) = self.pending_chunk_path.take() {
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn save_ingest_state(&self) -> Result<()> {
        let (Some(platform_id), Some(video_id)) = (&self.vod_platform_id, self.video_id) else {
            return Ok(());
        };
        self.store.upsert_live_ingest_state(
            platform_id,
            video_id,
            &self.streamer,
            self.ingest_cursor_seconds,
            self.last_seen_duration_seconds,
        )
    }

    fn finalize(&mut self) -> Result<()> {
        self.commit_pending_progress()?;
        if let Some(video_id) = self.video_id {
            self.store.mark_video_processed(video_id, true)?;
        }
        self.finished = true;
        info!(
            streamer = %self.streamer,
            video_id = ?self.video_id,
            "archive finalized"
        );
        Ok(())
    }
}

#[async_trait]
impl AudioSource for ArchiveFollower {
    async fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_dir)?;
        self.started = true;
        self.refresh_state(true).await
    }

    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if self.finished {
            return Ok(None);
        }

        self.commit_pending_progress()?;
        self.refresh_state(false).await?;

        if self.vod_platform_id.is_none() || self.video_id.is_none() {
            if self.last_is_live == Some(false) {
                self.finished = true;
            }
            return Ok(None);
        }

        let cursor = self.ingest_cursor_seconds;
        let lag = if self.last_is_live == Some(true) {
            self.config.lag_seconds
        } else {
            0
        };
        let safe_end = self.last_seen_duration_seconds.saturating_sub(lag);

        if safe_end > cursor {
            let chunk_len = self.config.chunk_seconds.min(safe_end - cursor);
            let chunk_path = self.extract_chunk(cursor, chunk_len).await?;

            self.pending_commit_end_seconds = Some(cursor + chunk_len);
            self.pending_chunk_path = Some(chunk_path.clone());

            debug!(
                offset = cursor,
                length = chunk_len,
                safe_end,
                "extracted archive window"
            );
            return Ok(Some(AudioChunk {
                path: chunk_path,
                offset_seconds: cursor as f64,
                duration_seconds: chunk_len as f64,
            }));
        }

        if self.last_is_live == Some(false) && self.no_growth_checks >= self.config.finalize_checks
        {
            self.finalize()?;
        }

        Ok(None)
    }

    async fn stop(&mut self) -> Result<()> {
        self.finished = true;
        if self.temp_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.temp_dir);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn video_id(&self) -> Option<i64> {
        self.video_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeTwitch {
        live_sequence: Mutex<Vec<bool>>,
        duration_seconds: u64,
    }

    impl FakeTwitch {
        fn new(live_sequence: &[bool], duration_seconds: u64) -> Self {
            Self {
                live_sequence: Mutex::new(live_sequence.to_vec()),
                duration_seconds,
            }
        }
    }

    #[async_trait]
    impl TwitchApi for FakeTwitch {
        async fn is_live(&self, _streamer: &str) -> Result<bool> {
            let mut seq = self.live_sequence.lock().unwrap();
            if seq.len() > 1 {
                Ok(seq.remove(0))
            } else {
                Ok(seq[0])
            }
        }

        async fn get_user_id(&self, _streamer: &str) -> Result<String> {
            Ok("user-1".into())
        }

        async fn get_latest_archive(&self, _user_id: &str) -> Result<Option<ArchiveVideo>> {
            Ok(Some(ArchiveVideo {
                id: "vod-1".into(),
                url: "https://www.twitch.tv/videos/vod-1".into(),
                title: "Live stream".into(),
                duration_seconds: self.duration_seconds,
                created_at: "2026-02-15T10:00:00Z".into(),
            }))
        }
    }

    struct FakeExtractor;

    #[async_trait]
    impl MediaExtractor for FakeExtractor {
        async fn resolve_media_url(&self, _archive_url: &str) -> Result<String> {
            Ok("http://cdn.example/media.m3u8".into())
        }

        async fn extract_window(
            &self,
            _media_url: &str,
            _start_seconds: u64,
            _duration_seconds: u64,
            output: &Path,
        ) -> Result<()> {
            std::fs::write(output, b"fake")?;
            Ok(())
        }

        async fn prepare_query(&self, _clip: &Path, _temp_dir: &Path) -> Result<PathBuf> {
            unreachable!("not used by the follower")
        }
    }

    fn make_follower(
        tmp: &Path,
        store: Arc<MetadataStore>,
        live_sequence: &[bool],
    ) -> ArchiveFollower {
        let config = IngestConfig {
            chunk_seconds: 60,
            lag_seconds: 120,
            poll_seconds: 0.0,
            finalize_checks: 2,
        };
        ArchiveFollower::new(
            "alice",
            store,
            Arc::new(FakeTwitch::new(live_sequence, 240)),
            Arc::new(FakeExtractor),
            config,
            tmp.join("chunks"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn cursor_advances_on_next_poll() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        let mut source = make_follower(tmp.path(), store, &[true, true, true]);
        source.start().await.unwrap();

        // safe_end = 240 - 120 = 120, so two windows are allowed.
        let chunk1 = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk1.offset_seconds, 0.0);
        assert_eq!(chunk1.duration_seconds, 60.0);
        assert_eq!(source.ingest_cursor_seconds(), 0);

        let chunk2 = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk2.offset_seconds, 60.0);
        assert_eq!(source.ingest_cursor_seconds(), 60);
    }

    #[tokio::test]
    async fn commit_deletes_the_drained_chunk_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        let mut source = make_follower(tmp.path(), store.clone(), &[true, true, true]);
        source.start().await.unwrap();

        let chunk1 = source.next_chunk().await.unwrap().unwrap();
        assert!(chunk1.path.exists());

        source.next_chunk().await.unwrap().unwrap();
        assert!(!chunk1.path.exists());

        let state = store.get_live_ingest_state("vod-1").unwrap().unwrap();
        assert_eq!(state.last_ingested_seconds, 60);
        assert_eq!(state.last_seen_duration_seconds, 240);
    }

    #[tokio::test]
    async fn finalize_marks_video_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        let mut source = make_follower(
            tmp.path(),
            store.clone(),
            &[true, true, false, false, false, false],
        );
        source.start().await.unwrap();

        for _ in 0..20 {
            source.next_chunk().await.unwrap();
            if source.is_finished() {
                break;
            }
        }

        assert!(source.is_finished());
        let video_id = source.video_id().unwrap();

        let row = store
            .get_video_by_url("https://www.twitch.tv/videos/vod-1")
            .unwrap()
            .unwrap();
        assert_eq!(row.id, video_id);
        assert!(row.processed);

        // Offline polls drop the lag, so the full 240 s got ingested.
        let state = store.get_live_ingest_state("vod-1").unwrap().unwrap();
        assert_eq!(state.last_ingested_seconds, 240);
    }

    #[tokio::test]
    async fn persisted_cursor_is_adopted_on_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::in_memory().unwrap());

        let creator = store
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        let video = store
            .create_video(
                creator,
                "https://www.twitch.tv/videos/vod-1",
                "Live stream",
                true,
            )
            .unwrap();
        store
            .upsert_live_ingest_state("vod-1", video, "alice", 60, 240)
            .unwrap();

        let mut source = make_follower(tmp.path(), store.clone(), &[true]);
        source.start().await.unwrap();

        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.offset_seconds, 60.0);
        assert_eq!(source.video_id(), Some(video));

        // Re-adopting the growing archive resets the processed flag.
        let row = store
            .get_video_by_url("https://www.twitch.tv/videos/vod-1")
            .unwrap()
            .unwrap();
        assert!(!row.processed);
    }

    #[tokio::test]
    async fn stop_removes_the_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        let mut source = make_follower(tmp.path(), store, &[true]);
        source.start().await.unwrap();
        assert!(tmp.path().join("chunks").exists());

        source.stop().await.unwrap();
        assert!(!tmp.path().join("chunks").exists());
        assert!(source.is_finished());
        assert!(source.next_chunk().await.unwrap().is_none());
    }
}
