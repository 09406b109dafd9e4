//! Control-plane handlers: CRUD over chaos configs plus the request-log
//! feed. Everything here sits behind the admin API-key middleware.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::ChaosConfig;
use crate::observer::LogSink;
use crate::store::{ConfigStore, StoreError};

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn ConfigStore>,
    pub sink: Arc<dyn LogSink>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Configuration not found"})),
        ),
        other => {
            error!("store operation failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Storage operation failed"})),
            )
        }
    }
}

pub async fn create_config(
    State(state): State<AdminState>,
    Json(mut config): Json<ChaosConfig>,
) -> Result<impl IntoResponse, ApiError> {
    if config.id.is_empty() {
        config.id = Uuid::new_v4().to_string();
    }
    let now = Utc::now();
    config.created_at = now;
    config.updated_at = now;
    // New configs start active unless explicitly re-disabled via update.
    config.enabled = true;

    if let Err(e) = config.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        ));
    }

    state.store.save(&config).await.map_err(store_error)?;
    info!("created config {}", config.id);
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn list_configs(
    State(state): State<AdminState>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state.store.list().await.map_err(store_error)?;
    let count = configs.len();
    Ok(Json(json!({
        "configs": configs,
        "count": count,
    })))
}

pub async fn get_config(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.store.get(&id).await.map_err(store_error)?;
    Ok(Json(config))
}

pub async fn update_config(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(mut config): Json<ChaosConfig>,
) -> Result<impl IntoResponse, ApiError> {
    // The path id wins over whatever the body claims.
    config.id = id.clone();

    if let Err(e) = config.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        ));
    }

    state.store.update(&config).await.map_err(store_error)?;
    let updated = state.store.get(&id).await.map_err(store_error)?;
    info!("updated config {}", id);
    Ok(Json(updated))
}

pub async fn delete_config(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete(&id).await.map_err(store_error)?;
    info!("deleted config {}", id);
    Ok(Json(json!({"deleted": id})))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn get_logs(
    State(state): State<AdminState>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50);
    let logs = state.sink.recent(limit).await.map_err(store_error)?;
    let count = logs.len();
    Ok(Json(json!({
        "logs": logs,
        "count": count,
    })))
}
