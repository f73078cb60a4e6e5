//! Error types for age token handling

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using TokenError
pub type Result<T> = std::result::Result<T, TokenError>;

/// Errors raised while building, encoding or decoding tokens
#[derive(Error, Debug)]
pub enum TokenError {
    /// Token structure could not be parsed (segments, base64, JSON, schema)
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Signature does not match the header and payload, or the key id is unknown
    #[error("Token signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Claims violate an invariant at construction time
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Key material could not be decoded
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
}

/// Errors raised while loading or persisting the issuer key file
///
/// These are fatal at startup: a corrupt key file must never be silently
/// replaced by a freshly generated key.
#[derive(Error, Debug)]
pub enum KeyLoadError {
    #[error("Key file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt key file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to persist key file {}: {reason}", path.display())]
    Persist { path: PathBuf, reason: String },
}

impl From<ed25519_dalek::SignatureError> for TokenError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        TokenError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        TokenError::SerializationError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::SignatureInvalid(err.to_string()),
            ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::RsaFailedSigning => TokenError::CryptoError(err.to_string()),
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}
