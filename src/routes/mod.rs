// src/routes/mod.rs
pub mod ingest;
pub mod viewer;

use axum::{
    http::{Method, Uri},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router() -> Router {
    Router::new()
        .route("/updatepos", post(ingest::update_position))
        .route("/updatestatus", post(ingest::update_status))
        .route("/bootstrap", get(viewer::bootstrap))
        .route("/people", get(viewer::people))
        .route("/health", get(health))
        .fallback(unsupported)
}

/// Full application: routes plus shared state, request logging and CORS.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    create_router()
        .layer(Extension(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    users: usize,
    viewers: usize,
}

async fn health(Extension(app_state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        users: app_state.tracker.registry().count().await,
        viewers: app_state.tracker.fanout().count(),
    })
}

async fn unsupported(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound(format!("unsupported endpoint requested: {method} {uri}"))
}
