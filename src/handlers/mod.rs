pub mod groups;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    /// No group with that name is being monitored.
    UnknownGroup(String),
    /// The group's actor has stopped.
    Stopped(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownGroup(name) => {
                (StatusCode::NOT_FOUND, format!("no monitoring group `{name}`"))
            }
            Self::Stopped(name) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("monitoring group `{name}` has stopped"),
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
