use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Stamped on responses when the upstream could not be reached.
pub const HEADER_PROXY_ERROR: &str = "X-Chaos-Proxy-Error";

/// The failure modes a proxied request can hit before or instead of a
/// normal upstream exchange. Display strings double as response bodies.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing configuration ID. Use path /proxy/{{configID}}/... or header X-Chaos-Config-ID")]
    MissingConfigId,

    /// Store miss, store timeout, and store transport errors all collapse
    /// here: clients cannot tell absence from unreachability.
    #[error("Configuration not found")]
    ConfigNotFound,

    #[error("Configuration is disabled")]
    ConfigDisabled,

    #[error("Invalid target URL")]
    InvalidTarget,

    #[error("Proxy error")]
    Upstream(#[source] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingConfigId => StatusCode::BAD_REQUEST,
            ProxyError::ConfigNotFound => StatusCode::NOT_FOUND,
            ProxyError::ConfigDisabled => StatusCode::FORBIDDEN,
            ProxyError::InvalidTarget => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.to_string();
        match self {
            ProxyError::Upstream(_) => {
                (status, [(HEADER_PROXY_ERROR, "true")], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::MissingConfigId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::ConfigNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyError::ConfigDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ProxyError::InvalidTarget.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bodies_match_wire_text() {
        assert_eq!(ProxyError::ConfigNotFound.to_string(), "Configuration not found");
        assert_eq!(
            ProxyError::ConfigDisabled.to_string(),
            "Configuration is disabled"
        );
        assert_eq!(ProxyError::InvalidTarget.to_string(), "Invalid target URL");
    }
}
