use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::api::json_line;
use crate::metrics::ApiMetrics;

pub const MISSING_SECRET_MESSAGE: &str = "Missing apisecret header.";
pub const WRONG_CREDENTIALS_MESSAGE: &str = "Wrong API key/secret.";
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Message body too large.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate apikey: {0}")]
    DuplicateApiKey(String),

    /// No `X-Thunder-Secret-Key` header on the request
    #[error("Missing apisecret header")]
    MissingSecret,

    /// Unknown apikey or secret mismatch; deliberately indistinguishable
    #[error("Wrong API key/secret")]
    Unauthorized,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Body exceeded `api.max_body_bytes`
    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::MissingSecret => (StatusCode::BAD_REQUEST, MISSING_SECRET_MESSAGE.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, WRONG_CREDENTIALS_MESSAGE.to_string()),
            AppError::InvalidPayload(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                PAYLOAD_TOO_LARGE_MESSAGE.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Config(_)
            | AppError::InvalidConfig(_)
            | AppError::DuplicateApiKey(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, client_message) = self.status_and_message();

        match &self {
            AppError::MissingSecret => {
                ApiMetrics::record_auth_failure("missing_secret");
                tracing::warn!("Request without apisecret header");
            }
            AppError::Unauthorized => {
                ApiMetrics::record_auth_failure("wrong_credentials");
                tracing::warn!("Request with wrong apikey/apisecret");
            }
            AppError::InvalidPayload(_) | AppError::PayloadTooLarge | AppError::NotFound(_) => {
                tracing::debug!(status = %status.as_u16(), error = %self, "API request rejected");
            }
            _ => {
                // Always log the detailed error server-side
                tracing::error!(status = %status.as_u16(), error = %self, "API error");
            }
        }

        json_line(
            status,
            &json!({
                "status": "error",
                "message": client_message,
            }),
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_fixed_messages() {
        let (status, message) = AppError::MissingSecret.status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Missing apisecret header.");

        let (status, message) = AppError::Unauthorized.status_and_message();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "Wrong API key/secret.");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let (status, message) =
            AppError::Internal("database password leaked here".to_string()).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");
    }
}
