//! REST API types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ServerError, StoreError};
use crate::models::{Import, LineError};
use crate::pipeline::DispatchQueue;
use crate::store::ImportStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ImportStore>,
    pub queue: Arc<dyn DispatchQueue>,
}

/// Import with its processing results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDetail {
    #[serde(flatten)]
    pub import: Import,
    pub entity_count: usize,
    pub line_errors: Vec<LineError>,
}

/// Create an error response body
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) | ServerError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Store(StoreError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}
