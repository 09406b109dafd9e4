use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use log::warn;

/// API-key gate for the admin surface. Built from a comma-separated key
/// list; an empty list disables the check entirely. Proxy routes never go
/// through this.
#[derive(Clone)]
pub struct ApiKeyAuth {
    keys: Arc<HashSet<String>>,
}

impl ApiKeyAuth {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: Arc::new(keys.into_iter().collect()),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    fn allows(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Checks `X-API-Key`, falling back to an `api_key` query parameter for
/// browser convenience.
pub async fn require_api_key(
    State(auth): State<ApiKeyAuth>,
    req: Request,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if !auth.enabled() {
        return Ok(next.run(req).await);
    }

    let header_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let key = header_key.or_else(|| query_param(req.uri().query(), "api_key"));

    match key {
        Some(ref k) if auth.allows(k) => Ok(next.run(req).await),
        _ => {
            warn!(
                "unauthorized admin access attempt: {} {}",
                req.method(),
                req.uri().path()
            );
            Err((
                StatusCode::UNAUTHORIZED,
                "Unauthorized: Invalid or missing API Key",
            ))
        }
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}
