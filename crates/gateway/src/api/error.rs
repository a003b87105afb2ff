//! Mapping from domain errors to JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use cg_domain::error::Error;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidParam(_) => StatusCode::BAD_REQUEST,
        Error::AlreadyPending(_) | Error::AlreadyConnected(_) | Error::SeedChanged(_) => {
            StatusCode::CONFLICT
        }
        Error::NoSeed => StatusCode::PRECONDITION_FAILED,
        Error::UpstreamConnect(_) | Error::UpstreamCall { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler error wrapper so `?` works on domain results.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        api_error(status, self.0.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
