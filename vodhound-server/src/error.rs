//! Server-specific error responses
//!
//! Every failure leaves the API as a structured `{code, message}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use vodhound_lib::HuntError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "code": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Fallback mapping for errors a handler does not translate itself.
impl From<HuntError> for ApiError {
    fn from(err: HuntError) -> Self {
        match err {
            HuntError::MonitorConflict(m) => ApiError::conflict("MONITOR_RUNNING", m),
            HuntError::SearchBusy(m) => ApiError::conflict("SEARCH_BLOCKED", m),
            HuntError::InvalidInput(m) => ApiError::bad_request("INVALID_INPUT", m),
            other => ApiError::internal(other.to_string()),
        }
    }
}
