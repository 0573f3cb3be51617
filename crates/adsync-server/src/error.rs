//! API error type and [`axum::response::IntoResponse`] implementation.

use adsync_core::BackendError;
use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by a trigger or health handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Sync(#[from] adsync_core::Error),

  #[error("directory unavailable: {0}")]
  Unavailable(String),
}

impl From<BackendError> for ApiError {
  fn from(e: BackendError) -> Self { Self::Sync(e.into()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::Sync(e) if e.is_not_found() => StatusCode::NOT_FOUND,
      ApiError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    tracing::error!(error = %self, %status, "request failed");
    (status, Json(json!({ "status": "ERROR", "info": self.to_string() })))
      .into_response()
  }
}
