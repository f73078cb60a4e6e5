//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use agetoken_anchor::AnchorError;
use agetoken_core::TokenError;

use crate::core::jobs::RotationError;
use crate::core::IssueError;
use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Trust anchor unreachable: {0}")]
    AnchorUnreachable(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
            ApiError::AnchorUnreachable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ANCHOR_UNREACHABLE",
                msg.clone(),
            ),
            ApiError::PublishRejected(msg) => {
                (StatusCode::BAD_GATEWAY, "PUBLISH_REJECTED", msg.clone())
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        error!(error = %err, "Storage failure");
        ApiError::Internal(err.to_string())
    }
}

impl From<AnchorError> for ApiError {
    fn from(err: AnchorError) -> Self {
        match err {
            AnchorError::PublishRejected(msg) => ApiError::PublishRejected(msg),
            AnchorError::Unreachable(msg) | AnchorError::InvalidResponse(msg) => {
                ApiError::AnchorUnreachable(msg)
            }
            AnchorError::Identity(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed(_) | TokenError::InvalidClaims(_) | TokenError::MissingField(_) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::DeviceRevoked(device) => {
                ApiError::Forbidden(format!("Device {} is revoked", device))
            }
            IssueError::Token(e) => ApiError::Internal(format!("Failed to mint token: {}", e)),
            IssueError::Storage(e) => e.into(),
        }
    }
}

impl From<RotationError> for ApiError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::ForeignPin(pinned) => {
                ApiError::Conflict(format!("Trust anchor pins a foreign key: {}", pinned))
            }
            RotationError::Anchor(e) => e.into(),
            RotationError::KeyFile(e) => {
                error!(error = %e, "Failed to persist rotated key");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("Invalid base64 encoding: {}", err))
    }
}
