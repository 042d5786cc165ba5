use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::db::watchers::WatcherRegistry;
use crate::detector::Detector;
use crate::error::SensorsError;
use crate::models::NewWatcher;

pub fn create_router(registry: Arc<dyn WatcherRegistry>, detector: Arc<Detector>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(api_stats))
        .route("/api/watchers", post(api_create_watcher))
        .route("/api/watchers", get(api_list_watchers))
        .route("/api/watchers/{key}", delete(api_delete_watcher))
        .layer(Extension(registry))
        .layer(Extension(detector))
        .layer(CorsLayer::permissive())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "eth-sensors",
        "timestamp": chrono::Utc::now().timestamp()
    }))
}

async fn api_stats(Extension(detector): Extension<Arc<Detector>>) -> impl IntoResponse {
    Json(json!({
        "orders_in_flight": detector.in_flight(),
        "has_pending": detector.pending().is_some(),
    }))
}

async fn api_create_watcher(
    Extension(registry): Extension<Arc<dyn WatcherRegistry>>,
    Json(request): Json<NewWatcher>,
) -> Result<impl IntoResponse, StatusCode> {
    match registry.create(request) {
        Ok(watcher) => Ok((StatusCode::CREATED, Json(json!({ "id": watcher.id })))),
        Err(e) if e.downcast_ref::<SensorsError>() == Some(&SensorsError::WatcherExists) => {
            Err(StatusCode::CONFLICT)
        }
        Err(e) => {
            error!("Failed to create watcher: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn api_delete_watcher(
    axum::extract::Path(key): axum::extract::Path<String>,
    Extension(registry): Extension<Arc<dyn WatcherRegistry>>,
) -> Result<impl IntoResponse, StatusCode> {
    match registry.delete(&key) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!("Failed to delete watcher {}: {:#}", key, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn api_list_watchers(
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
    Extension(registry): Extension<Arc<dyn WatcherRegistry>>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(20)
        .min(100);

    let offset = params
        .get("offset")
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    match registry.list(limit, offset) {
        Ok((watchers, total_count)) => Ok(Json(json!({
            "watchers": watchers,
            "total_count": total_count,
            "limit": limit,
            "offset": offset
        }))),
        Err(e) => {
            error!("Failed to list watchers: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
