//! Single-slot monitor supervisor.
//!
//! One worker task follows one streamer at a time: polling liveness,
//! running an ingest session while live, recording transient failures and
//! retrying after a back-off. The public calls never block on extraction
//! or embedding; they only touch the status snapshot.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{IngestConfig, MonitorConfig};
use crate::embed::Embedder;
use crate::error::{HuntError, Result};
use crate::ingest::IngestSession;
use crate::media::MediaExtractor;
use crate::source::ArchiveFollower;
use crate::store::{MetadataStore, VectorFileStore};
use crate::twitch::{normalize_login, TwitchApi};
use crate::types::{MonitorState, MonitorStatus};

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MonitorSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<MetadataStore>,
    vectors: Arc<VectorFileStore>,
    embedder: Arc<dyn Embedder>,
    twitch: Arc<dyn TwitchApi>,
    extractor: Arc<dyn MediaExtractor>,
    monitor_config: MonitorConfig,
    ingest_config: IngestConfig,
    temp_dir: PathBuf,

    status: parking_lot::Mutex<MonitorStatus>,
    stop_flag: AtomicBool,
    stop_notify: tokio::sync::Notify,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    active_session: parking_lot::Mutex<Option<Arc<IngestSession>>>,
}

impl MonitorSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MetadataStore>,
        vectors: Arc<VectorFileStore>,
        embedder: Arc<dyn Embedder>,
        twitch: Arc<dyn TwitchApi>,
        extractor: Arc<dyn MediaExtractor>,
        monitor_config: MonitorConfig,
        ingest_config: IngestConfig,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                vectors,
                embedder,
                twitch,
                extractor,
                monitor_config,
                ingest_config,
                temp_dir: temp_dir.into(),
                status: parking_lot::Mutex::new(MonitorStatus::default()),
                stop_flag: AtomicBool::new(false),
                stop_notify: tokio::sync::Notify::new(),
                worker: parking_lot::Mutex::new(None),
                active_session: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn get_status(&self) -> MonitorStatus {
        self.inner.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Search is allowed only while the monitor is fully idle.
    pub fn can_search(&self) -> bool {
        self.get_status().state == MonitorState::Idle
    }

    /// Start monitoring a streamer. Idempotent for the same streamer;
    /// a different streamer while running is a conflict.
    pub fn start(&self, streamer: &str) -> Result<MonitorStatus> {
        let login = normalize_login(streamer)?;

        let mut worker = self.inner.worker.lock();
        let already_running = worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        if already_running {
            let status = self.inner.status.lock().clone();
            if status.streamer.as_deref() == Some(login.as_str()) {
                return Ok(status);
            }
            return Err(HuntError::MonitorConflict(format!(
                "Monitor already running for {}. Stop first to switch.",
                status.streamer.as_deref().unwrap_or("another streamer")
            )));
        }

        self.inner.stop_flag.store(false, Ordering::SeqCst);
        let status = {
            let mut status = self.inner.status.lock();
            *status = MonitorStatus {
                state: MonitorState::Polling,
                streamer: Some(login.clone()),
                is_live: None,
                started_at: Some(chrono::Utc::now().to_rfc3339()),
                last_check_at: None,
                last_error: None,
                current_video_id: None,
            };
            status.clone()
        };

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move {
            run_loop(inner, login).await;
        }));

        info!(streamer = ?status.streamer, "monitor started");
        Ok(status)
    }

    /// Signal the stop event, stop any active session, and join the worker.
    /// Returns false when there was nothing to stop.
    pub async fn stop(&self) -> bool {
        let handle = {
            let mut worker = self.inner.worker.lock();
            let running = worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
            if !running && self.get_status().state == MonitorState::Idle {
                return false;
            }
            worker.take()
        };

        self.inner.stop_flag.store(true, Ordering::SeqCst);
        self.inner.stop_notify.notify_one();

        let session = self.inner.active_session.lock().clone();
        if let Some(session) = session {
            session.stop();
        }

        if let Some(handle) = handle {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!("monitor worker did not exit within the join timeout");
            }
        }

        *self.inner.active_session.lock() = None;
        *self.inner.status.lock() = MonitorStatus::default();
        info!("monitor stopped");
        true
    }
}

async fn run_loop(inner: Arc<Inner>, streamer: String) {
    while !inner.stop_flag.load(Ordering::SeqCst) {
        let is_live = match inner.twitch.is_live(&streamer).await {
            Ok(is_live) => {
                let mut status = inner.status.lock();
                status.state = MonitorState::Polling;
                status.is_live = Some(is_live);
                status.last_check_at = Some(chrono::Utc::now().to_rfc3339());
                status.last_error = None;
                is_live
            }
            Err(err) => {
                error!(%err, "liveness check failed");
                {
                    let mut status = inner.status.lock();
                    status.state = MonitorState::Error;
                    status.is_live = None;
                    status.last_check_at = Some(chrono::Utc::now().to_rfc3339());
                    status.last_error = Some(err.to_string());
                }
                sleep_interruptible(&inner, inner.monitor_config.retry_seconds).await;
                continue;
            }
        };

        if !is_live {
            sleep_interruptible(&inner, inner.monitor_config.poll_seconds).await;
            continue;
        }

        let follower = match ArchiveFollower::new(
            &streamer,
            inner.store.clone(),
            inner.twitch.clone(),
            inner.extractor.clone(),
            inner.ingest_config.clone(),
            &inner.temp_dir,
        ) {
            Ok(follower) => follower,
            Err(err) => {
                error!(%err, "failed to build archive follower");
                {
                    let mut status = inner.status.lock();
                    status.state = MonitorState::Error;
                    status.last_error = Some(err.to_string());
                }
                sleep_interruptible(&inner, inner.monitor_config.retry_seconds).await;
                continue;
            }
        };

        let session = Arc::new(IngestSession::new(
            Box::new(follower),
            inner.embedder.clone(),
            inner.store.clone(),
            inner.vectors.clone(),
            Duration::from_secs_f64(inner.monitor_config.session_poll_interval),
        ));
        {
            *inner.active_session.lock() = Some(session.clone());
            inner.status.lock().state = MonitorState::Ingesting;
        }

        match session.run().await {
            Ok(video_id) => {
                let mut status = inner.status.lock();
                status.state = MonitorState::Polling;
                status.is_live = Some(false);
                status.current_video_id = video_id;
                status.last_error = None;
                status.last_check_at = Some(chrono::Utc::now().to_rfc3339());
            }
            Err(err) => {
                error!(%err, "ingest session failed");
                let mut status = inner.status.lock();
                status.state = MonitorState::Error;
                status.last_error = Some(err.to_string());
                status.last_check_at = Some(chrono::Utc::now().to_rfc3339());
            }
        }
        *inner.active_session.lock() = None;

        if inner.stop_flag.load(Ordering::SeqCst) {
            break;
        }
        sleep_interruptible(&inner, inner.monitor_config.retry_seconds).await;
    }

    // Leave a clean idle status behind if stop() is not the one tearing
    // the worker down.
    let mut status = inner.status.lock();
    if status.state != MonitorState::Idle {
        *status = MonitorStatus::default();
    }
}

async fn sleep_interruptible(inner: &Inner, seconds: f64) {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
        _ = inner.stop_notify.notified() => {}
    }
}
