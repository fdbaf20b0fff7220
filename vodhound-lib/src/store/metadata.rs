//! SQLite-backed relational store for creators, videos, fingerprints, and
//! live-ingest cursors.
//!
//! Every operation runs on a shared connection behind a mutex; statements
//! are short-lived and rely on the schema's uniqueness constraints for the
//! cross-restart invariants.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{FingerprintRow, LiveIngestState, LiveSessionRow, Video};

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        info!("metadata store ready at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    /// Create tables and migrate: duplicate (video_id, timestamp_seconds)
    /// fingerprint rows and duplicate video URLs are collapsed onto the
    /// minimum id before the unique indexes are enforced.
    fn init(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS creators (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                url TEXT UNIQUE
            );

            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                creator_id INTEGER,
                url TEXT,
                title TEXT,
                processed BOOLEAN DEFAULT FALSE,
                FOREIGN KEY(creator_id) REFERENCES creators(id)
            );

            CREATE TABLE IF NOT EXISTS fingerprints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER,
                timestamp_seconds REAL,
                FOREIGN KEY(video_id) REFERENCES videos(id)
            );

            CREATE TABLE IF NOT EXISTS live_ingest_state (
                vod_platform_id TEXT PRIMARY KEY,
                video_id INTEGER NOT NULL,
                streamer TEXT NOT NULL,
                last_ingested_seconds INTEGER NOT NULL,
                last_seen_duration_seconds INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        // Collapse duplicate video URLs onto the oldest row, re-pointing
        // dependents, then lock the invariant in with unique indexes.
        conn.execute_batch(
            r#"
            UPDATE fingerprints SET video_id = (
                SELECT MIN(v2.id) FROM videos v2
                WHERE v2.url = (SELECT url FROM videos WHERE id = fingerprints.video_id)
            ) WHERE video_id IN (
                SELECT id FROM videos WHERE url IN
                    (SELECT url FROM videos GROUP BY url HAVING COUNT(*) > 1)
            );

            UPDATE live_ingest_state SET video_id = (
                SELECT MIN(v2.id) FROM videos v2
                WHERE v2.url = (SELECT url FROM videos WHERE id = live_ingest_state.video_id)
            ) WHERE video_id IN (
                SELECT id FROM videos WHERE url IN
                    (SELECT url FROM videos GROUP BY url HAVING COUNT(*) > 1)
            );

            DELETE FROM videos WHERE id NOT IN
                (SELECT MIN(id) FROM videos GROUP BY url);

            DELETE FROM fingerprints WHERE id NOT IN
                (SELECT MIN(id) FROM fingerprints GROUP BY video_id, timestamp_seconds);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_videos_url
                ON videos(url);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_fingerprints_video_ts
                ON fingerprints(video_id, timestamp_seconds);
            "#,
        )?;

        Ok(())
    }

    /// Insert-if-absent on creator url; returns the row id either way.
    pub fn create_or_get_creator(&self, name: &str, url: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO creators (name, url) VALUES (?1, ?2)",
            params![name, url],
        )?;
        let id = conn.query_row(
            "SELECT id FROM creators WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn create_video(
        &self,
        creator_id: i64,
        url: &str,
        title: &str,
        processed: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO videos (creator_id, url, title, processed) VALUES (?1, ?2, ?3, ?4)",
            params![creator_id, url, title, processed],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_video_by_url(&self, url: &str) -> Result<Option<Video>> {
        let conn = self.conn.lock();
        let video = conn
            .query_row(
                "SELECT id, creator_id, url, title, processed FROM videos WHERE url = ?1",
                params![url],
                |row| {
                    Ok(Video {
                        id: row.get(0)?,
                        creator_id: row.get(1)?,
                        url: row.get(2)?,
                        title: row.get(3)?,
                        processed: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(video)
    }

    pub fn mark_video_processed(&self, video_id: i64, processed: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE videos SET processed = ?1 WHERE id = ?2",
            params![processed, video_id],
        )?;
        Ok(())
    }

    /// Insert fingerprint rows for the given timestamps, idempotently.
    ///
    /// Returns the row id for each timestamp in input order, whether the
    /// insert created a new row or hit the unique index.
    pub fn store_fingerprints(&self, video_id: i64, timestamps: &[f64]) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let mut ids = Vec::with_capacity(timestamps.len());
        for &ts in timestamps {
            tx.execute(
                "INSERT OR IGNORE INTO fingerprints (video_id, timestamp_seconds) VALUES (?1, ?2)",
                params![video_id, ts],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM fingerprints WHERE video_id = ?1 AND timestamp_seconds = ?2",
                params![video_id, ts],
                |row| row.get(0),
            )?;
            ids.push(id);
        }

        tx.commit()?;
        debug!(video_id, rows = ids.len(), "stored fingerprints");
        Ok(ids)
    }

    /// Resolve fingerprint rows for a batch of ids. Input is deduplicated;
    /// result order is unspecified.
    pub fn get_fingerprint_rows(&self, ids: &[i64]) -> Result<Vec<FingerprintRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut unique: Vec<i64> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let placeholders = vec!["?"; unique.len()].join(",");
        let sql = format!(
            "SELECT id, video_id, timestamp_seconds FROM fingerprints WHERE id IN ({placeholders})"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(unique.iter()), |row| {
            Ok(FingerprintRow {
                id: row.get(0)?,
                video_id: row.get(1)?,
                timestamp_seconds: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Highest fingerprint id ever assigned, if any. Compared against the
    /// vector-file row count to detect unindexed rows after a torn write.
    pub fn max_fingerprint_id(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let id = conn.query_row("SELECT MAX(id) FROM fingerprints", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        Ok(id)
    }

    /// (video_id, url, title, creator_name) for the search answer.
    pub fn get_video_with_creator(
        &self,
        video_id: i64,
    ) -> Result<Option<(i64, String, String, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"
                SELECT videos.id, videos.url, videos.title, creators.name
                FROM videos
                JOIN creators ON creators.id = videos.creator_id
                WHERE videos.id = ?1
                "#,
                params![video_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_live_ingest_state(&self, vod_platform_id: &str) -> Result<Option<LiveIngestState>> {
        let conn = self.conn.lock();
        let state = conn
            .query_row(
                r#"
                SELECT vod_platform_id, video_id, streamer,
                       last_ingested_seconds, last_seen_duration_seconds, updated_at
                FROM live_ingest_state WHERE vod_platform_id = ?1
                "#,
                params![vod_platform_id],
                |row| {
                    Ok(LiveIngestState {
                        vod_platform_id: row.get(0)?,
                        video_id: row.get(1)?,
                        streamer: row.get(2)?,
                        last_ingested_seconds: row.get::<_, i64>(3)? as u64,
                        last_seen_duration_seconds: row.get::<_, i64>(4)? as u64,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Atomic upsert keyed on the platform VOD id.
    pub fn upsert_live_ingest_state(
        &self,
        vod_platform_id: &str,
        video_id: i64,
        streamer: &str,
        last_ingested_seconds: u64,
        last_seen_duration_seconds: u64,
    ) -> Result<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO live_ingest_state
                (vod_platform_id, video_id, streamer,
                 last_ingested_seconds, last_seen_duration_seconds, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(vod_platform_id) DO UPDATE SET
                video_id = excluded.video_id,
                streamer = excluded.streamer,
                last_ingested_seconds = excluded.last_ingested_seconds,
                last_seen_duration_seconds = excluded.last_seen_duration_seconds,
                updated_at = excluded.updated_at
            "#,
            params![
                vod_platform_id,
                video_id,
                streamer,
                last_ingested_seconds as i64,
                last_seen_duration_seconds as i64,
                updated_at,
            ],
        )?;
        Ok(())
    }

    /// Reverse-chronological slice of videos whose URL matches the Twitch
    /// watch pattern.
    pub fn list_live_sessions(&self, limit: u32, offset: u32) -> Result<Vec<LiveSessionRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT videos.id, creators.name, videos.url, videos.title, videos.processed
            FROM videos
            JOIN creators ON creators.id = videos.creator_id
            WHERE videos.url LIKE 'https://twitch.tv/%'
               OR videos.url LIKE 'https://www.twitch.tv/%'
            ORDER BY videos.id DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;

        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok(LiveSessionRow {
                video_id: row.get(0)?,
                creator_name: row.get(1)?,
                url: row.get(2)?,
                title: row.get(3)?,
                processed: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MetadataStore, i64) {
        let store = MetadataStore::in_memory().unwrap();
        let creator = store
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        let video = store
            .create_video(creator, "https://www.twitch.tv/videos/1", "Stream", false)
            .unwrap();
        (store, video)
    }

    #[test]
    fn creator_insert_is_idempotent_on_url() {
        let store = MetadataStore::in_memory().unwrap();
        let a = store
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        let b = store
            .create_or_get_creator("alice-renamed", "https://twitch.tv/alice")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_insert_is_idempotent() {
        let (store, video) = seeded();
        let first = store.store_fingerprints(video, &[1.0, 2.0]).unwrap();
        let second = store.store_fingerprints(video, &[1.0, 2.0]).unwrap();
        assert_eq!(first, second);

        let rows = store.get_fingerprint_rows(&first).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn fingerprint_rows_dedupe_requested_ids() {
        let (store, video) = seeded();
        let ids = store.store_fingerprints(video, &[5.0]).unwrap();
        let rows = store
            .get_fingerprint_rows(&[ids[0], ids[0], ids[0]])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp_seconds, 5.0);
    }

    #[test]
    fn live_ingest_state_upsert_and_read() {
        let (store, video) = seeded();

        store
            .upsert_live_ingest_state("vod-1", video, "alice", 120, 240)
            .unwrap();
        store
            .upsert_live_ingest_state("vod-1", video, "alice", 180, 300)
            .unwrap();

        let state = store.get_live_ingest_state("vod-1").unwrap().unwrap();
        assert_eq!(state.last_ingested_seconds, 180);
        assert_eq!(state.last_seen_duration_seconds, 300);
        assert_eq!(state.streamer, "alice");

        assert!(store.get_live_ingest_state("vod-2").unwrap().is_none());
    }

    #[test]
    fn list_live_sessions_filters_and_orders() {
        let store = MetadataStore::in_memory().unwrap();
        let creator = store
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        store
            .create_video(creator, "https://www.twitch.tv/videos/1", "First", true)
            .unwrap();
        store
            .create_video(creator, "https://example.com/other", "Elsewhere", true)
            .unwrap();
        store
            .create_video(creator, "https://www.twitch.tv/videos/2", "Second", false)
            .unwrap();

        let rows = store.list_live_sessions(50, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Second");
        assert_eq!(rows[1].title, "First");

        let paged = store.list_live_sessions(1, 1).unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].title, "First");
    }

    #[test]
    fn duplicate_video_url_is_rejected_after_tightening() {
        let (store, _) = seeded();
        let creator = store
            .create_or_get_creator("alice", "https://twitch.tv/alice")
            .unwrap();
        let dup = store.create_video(creator, "https://www.twitch.tv/videos/1", "Again", false);
        assert!(dup.is_err());

        let found = store
            .get_video_by_url("https://www.twitch.tv/videos/1")
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "Stream");
    }

    #[test]
    fn max_fingerprint_id_tracks_inserts() {
        let (store, video) = seeded();
        assert!(store.max_fingerprint_id().unwrap().is_none());
        let ids = store.store_fingerprints(video, &[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(store.max_fingerprint_id().unwrap(), ids.last().copied());
    }
}
