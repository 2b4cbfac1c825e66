pub mod host;
pub mod settings;
pub mod sources;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    UnknownSource(String),
    NoData(String),
    BadRequest(String),
    ProbeFailed(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownSource(id) => {
                (StatusCode::NOT_FOUND, format!("unknown source '{id}'"))
            }
            Self::NoData(id) => {
                (StatusCode::NOT_FOUND, format!("no samples yet for '{id}'"))
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::ProbeFailed(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
