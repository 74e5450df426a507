//! Request-boundary error type for both services.
//!
//! Every failure that escapes a handler is converted into an HTTP response
//! carrying a `{"error": ...}` body. The status mapping is deliberately
//! small: 400 for malformed or incomplete requests, 404 for models that do
//! not exist or could not be loaded, 500 for everything else.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::error::Error;
use std::fmt;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed request fields.
    BadRequest(String),
    /// Unknown model name, or a model whose load failed.
    NotFound(String),
    /// Any internal failure; the underlying message is surfaced verbatim.
    Internal(anyhow::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "{msg}"),
            ApiError::NotFound(msg) => write!(f, "{msg}"),
            // Alternate formatting includes the cause chain, so handlers can
            // attach context without losing the underlying message.
            ApiError::Internal(err) => write!(f, "{err:#}"),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
