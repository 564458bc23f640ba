//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::anthropic_types::ErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Gateway is not configured. Set upstream base_url and api_key.")]
    NotConfigured,

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("Upstream request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Build an upstream error from a non-2xx status and whatever body text it sent.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = if body.is_empty() {
            format!("Upstream error: HTTP {status}")
        } else {
            body
        };
        Self::Upstream { status, message }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config { .. } | Self::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The `error.type` value carried in the client-facing envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::NotConfigured => "invalid_request_error",
            Self::Unauthorized => "unauthorized",
            Self::Upstream { .. } | Self::Timeout(_) | Self::Http(_) => "upstream_error",
            Self::Config { .. } | Self::Toml(_) => "api_error",
        }
    }

    pub fn to_envelope(&self) -> ErrorResponse {
        let message = if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };
        ErrorResponse::new(self.kind(), message)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_keeps_status_and_body() {
        let err = GatewayError::upstream(429, "slow down");
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        let envelope = err.to_envelope();
        assert_eq!(envelope.error_type, "error");
        assert_eq!(envelope.error.error_type, "upstream_error");
        assert_eq!(envelope.error.message, "slow down");
    }

    #[test]
    fn test_upstream_error_without_body() {
        let err = GatewayError::upstream(500, "");
        assert_eq!(err.to_envelope().error.message, "Upstream error: HTTP 500");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = GatewayError::config("secret path /etc/x");
        let envelope = err.to_envelope();
        assert_eq!(envelope.error.error_type, "api_error");
        assert_eq!(envelope.error.message, "Internal Server Error");
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(
            GatewayError::invalid_request("model is required").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::Unauthorized.kind(), "unauthorized");
        assert_eq!(
            GatewayError::NotConfigured.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::Timeout(1000).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_toml_error_is_internal() {
        let parse = toml::from_str::<toml::Table>("listen_port = ").unwrap_err();
        let err = GatewayError::from(parse);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "api_error");
    }
}
