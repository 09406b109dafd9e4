//! HTTP surface assembly. Admin and health routes are matched first; the
//! path-addressed proxy comes next; everything else falls through to the
//! header-addressed proxy.

use std::collections::HashMap;

use axum::extract::{Path, Request, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::admin::{
    create_config, delete_config, get_config, get_logs, list_configs, update_config, AdminState,
};
use crate::auth::{require_api_key, ApiKeyAuth};
use crate::error::ProxyError;
use crate::proxy::{handle_proxy, AddressingMode, ProxyState, HEADER_CONFIG_ID_REQUEST};

pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn proxy_by_path(
    State(state): State<ProxyState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Response {
    let config_id = params.get("config_id").cloned().unwrap_or_default();
    if config_id.is_empty() {
        return ProxyError::MissingConfigId.into_response();
    }
    handle_proxy(state, config_id, AddressingMode::Path, req).await
}

async fn proxy_by_header(State(state): State<ProxyState>, req: Request) -> Response {
    let config_id = req
        .headers()
        .get(HEADER_CONFIG_ID_REQUEST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match config_id {
        Some(id) if !id.is_empty() => handle_proxy(state, id, AddressingMode::Header, req).await,
        _ => ProxyError::MissingConfigId.into_response(),
    }
}

/// Builds the full router. The admin sub-router carries its own state and
/// auth layer; proxy routes are deliberately unauthenticated.
pub fn app(proxy: ProxyState, admin: AdminState, auth: ApiKeyAuth) -> Router {
    let admin_api = Router::new()
        .route("/configs", post(create_config).get(list_configs))
        .route(
            "/configs/:id",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route("/logs", get(get_logs))
        .layer(middleware::from_fn_with_state(auth, require_api_key))
        .with_state(admin);

    Router::new()
        .route("/health", get(health_check))
        .nest_service("/api/v1", admin_api)
        .route("/proxy/:config_id", any(proxy_by_path))
        .route("/proxy/:config_id/*path", any(proxy_by_path))
        .fallback(proxy_by_header)
        .with_state(proxy)
}
