//! Error types for trust anchor access

use thiserror::Error;

/// Result type for trust anchor operations
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors that can occur talking to a trust anchor
#[derive(Error, Debug)]
pub enum AnchorError {
    /// The anchor could not be reached, timed out, or returned a transient failure
    #[error("Trust anchor unreachable: {0}")]
    Unreachable(String),

    /// The anchor refused the transition (unauthorized publisher, bad signature, replay)
    #[error("Publish rejected by trust anchor: {0}")]
    PublishRejected(String),

    /// The anchor answered with something that is not a valid state or receipt
    #[error("Invalid trust anchor response: {0}")]
    InvalidResponse(String),

    /// Publisher identity could not be loaded
    #[error("Publisher identity error: {0}")]
    Identity(String),
}

impl AnchorError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnchorError::Unreachable(_))
    }
}

impl From<reqwest::Error> for AnchorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AnchorError::InvalidResponse(err.to_string())
        } else {
            AnchorError::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AnchorError {
    fn from(err: serde_json::Error) -> Self {
        AnchorError::InvalidResponse(err.to_string())
    }
}

impl From<agetoken_core::KeyLoadError> for AnchorError {
    fn from(err: agetoken_core::KeyLoadError) -> Self {
        AnchorError::Identity(err.to_string())
    }
}
