//! Error types for the Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use foresight_core::ForesightError;
use thiserror::Error;

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] ForesightError),

    #[error("Push hub is closed")]
    HubClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(e: toml::de::Error) -> Self {
        GatewayError::InvalidConfig(e.to_string())
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Engine(e) => status_for(e.error_type()),
            Self::HubClosed => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.error_type(),
            Self::HubClosed => "hub_closed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => "internal",
        }
    }
}

/// HTTP status for an engine `error_type()` label
pub fn status_for(error_type: &str) -> StatusCode {
    match error_type {
        "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
        "trigger_not_found" => StatusCode::NOT_FOUND,
        "engine_not_running" => StatusCode::SERVICE_UNAVAILABLE,
        "invalid_config" => StatusCode::BAD_REQUEST,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({
            "error_type": self.error_type(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

/// Result type for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
