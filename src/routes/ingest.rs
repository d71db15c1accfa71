// src/routes/ingest.rs
use axum::{body::Bytes, http::StatusCode, Extension};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{PositionUpdate, StatusUpdate};
use crate::state::AppState;

// Producers do not always send a JSON content type, so decode the raw body.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("malformed payload: {e}")))
}

pub async fn update_position(
    Extension(app_state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let update: PositionUpdate = decode(&body)?;
    app_state.tracker.update_position(update).await?;
    Ok(StatusCode::OK)
}

pub async fn update_status(
    Extension(app_state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let update: StatusUpdate = decode(&body)?;
    app_state.tracker.update_status(update).await?;
    Ok(StatusCode::OK)
}
