use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
}

/// Error returned from HTTP handlers.
///
/// Bodies use the `{"detail": "..."}` shape for every status:
/// - `Validation` → 4xx (400 for our own checks, the extractor's status for rejections)
/// - `Timeout` → 504 with the fixed detail "Request timeout"
/// - `Internal` → 500 carrying the upstream error text
#[derive(Debug)]
pub enum ApiError {
    Validation { status: StatusCode, detail: String },
    Timeout,
    Internal(String),
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::Validation {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

pub const TIMEOUT_DETAIL: &str = "Request timeout";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation { status, detail } => (status, detail),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, TIMEOUT_DETAIL.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, axum::Json(json!({ "detail": detail }))).into_response()
    }
}
