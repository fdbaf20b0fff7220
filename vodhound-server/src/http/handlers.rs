//! API handlers

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use vodhound_lib::types::{LiveSessionRow, MonitorStatus, SearchResult};
use vodhound_lib::HuntError;

use crate::error::ApiError;
use crate::state::AppState;

const SESSIONS_DEFAULT_LIMIT: u32 = 50;
const SESSIONS_MAX_LIMIT: u32 = 200;

/// Health check endpoint
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Current monitor snapshot
pub async fn live_status(State(state): State<Arc<AppState>>) -> Json<MonitorStatus> {
    Json(state.monitor.get_status())
}

#[derive(Debug, Deserialize)]
pub struct LiveStartRequest {
    pub streamer: String,
}

#[derive(Debug, Serialize)]
pub struct LiveStartResponse {
    pub status: MonitorStatus,
}

/// Start monitoring a streamer
pub async fn live_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LiveStartRequest>,
) -> Result<Json<LiveStartResponse>, ApiError> {
    let status = state.monitor.start(&request.streamer).map_err(|err| match err {
        HuntError::MonitorConflict(m) => ApiError::conflict("MONITOR_RUNNING", m),
        HuntError::InvalidInput(m) => ApiError::bad_request("INVALID_STREAMER", m),
        other => ApiError::from(other),
    })?;
    Ok(Json(LiveStartResponse { status }))
}

#[derive(Debug, Serialize)]
pub struct LiveStopResponse {
    pub stopped: bool,
    pub status: MonitorStatus,
}

/// Stop the monitor and wait for the worker to wind down
pub async fn live_stop(State(state): State<Arc<AppState>>) -> Json<LiveStopResponse> {
    let stopped = state.monitor.stop().await;
    Json(LiveStopResponse {
        stopped,
        status: state.monitor.get_status(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// List previously followed archives, newest first
pub async fn live_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<LiveSessionRow>>, ApiError> {
    let limit = query.limit.unwrap_or(SESSIONS_DEFAULT_LIMIT);
    if limit < 1 || limit > SESSIONS_MAX_LIMIT {
        return Err(ApiError::bad_request(
            "INVALID_QUERY",
            format!("limit must be between 1 and {SESSIONS_MAX_LIMIT}"),
        ));
    }
    let offset = query.offset.unwrap_or(0);

    let rows = state.store.list_live_sessions(limit, offset)?;
    Ok(Json(rows))
}

/// Search the index for an uploaded clip (multipart `file` field)
pub async fn search_clip(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SearchResult>, ApiError> {
    if !state.monitor.can_search() {
        return Err(ApiError::conflict(
            "SEARCH_BLOCKED",
            "Search is unavailable while live monitor is running. Stop monitor first.",
        ));
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("INVALID_UPLOAD", e.to_string()))?
        .ok_or_else(|| ApiError::bad_request("INVALID_UPLOAD", "upload is missing a file field"))?;

    let filename = field
        .file_name()
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("INVALID_UPLOAD", "uploaded file must have a filename")
        })?;

    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request("INVALID_UPLOAD", e.to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request(
            "INVALID_UPLOAD",
            "uploaded file is empty",
        ));
    }

    let suffix = std::path::Path::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".bin".to_string());
    let upload_path = state
        .upload_dir
        .join(format!("upload_{}{suffix}", uuid::Uuid::new_v4().simple()));

    std::fs::create_dir_all(&state.upload_dir)
        .and_then(|_| std::fs::write(&upload_path, &bytes))
        .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;
    debug!(path = %upload_path.display(), bytes = bytes.len(), "staged search upload");

    let outcome = state.search.search_file(&upload_path).await;
    let _ = std::fs::remove_file(&upload_path);

    match outcome {
        Ok(result) => Ok(Json(result)),
        Err(HuntError::InvalidInput(m)) => Err(ApiError::bad_request("INVALID_UPLOAD", m)),
        Err(other) => Err(ApiError::bad_request("PROCESSING_ERROR", other.to_string())),
    }
}
