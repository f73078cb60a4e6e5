//! Typed verification outcomes

use std::fmt;

use agetoken_core::{Thumbprint, TokenError};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by the verifier, the service and the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    KeyLoadError,
    Malformed,
    SignatureInvalid,
    Expired,
    Revoked,
    TrustIntegrityFailure,
    AnchorUnreachable,
    PublishRejected,
}

impl ErrorKind {
    /// Stable name used in responses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyLoadError => "KeyLoadError",
            ErrorKind::Malformed => "Malformed",
            ErrorKind::SignatureInvalid => "SignatureInvalid",
            ErrorKind::Expired => "Expired",
            ErrorKind::Revoked => "Revoked",
            ErrorKind::TrustIntegrityFailure => "TrustIntegrityFailure",
            ErrorKind::AnchorUnreachable => "AnchorUnreachable",
            ErrorKind::PublishRejected => "PublishRejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a token counts as revoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum RevocationCause {
    /// The token hash is in the revocation tree
    Token,
    /// The bound device was revoked
    Device,
    /// Minted before the last generation bump
    Generation { token_generation: u64, current_generation: u64 },
}

impl fmt::Display for RevocationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevocationCause::Token => f.write_str("token revoked"),
            RevocationCause::Device => f.write_str("device revoked"),
            RevocationCause::Generation {
                token_generation,
                current_generation,
            } => write!(
                f,
                "generation {} is below current generation {}",
                token_generation, current_generation
            ),
        }
    }
}

/// A token the verifier refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },

    #[error("Token revoked: {0}")]
    Revoked(RevocationCause),

    /// The anchored thumbprint is not the issuer's key. Every token is
    /// refused until an operator resolves it.
    #[error("Trust anchor thumbprint {} does not match issuer key {expected}", display_anchored(.anchored))]
    TrustIntegrityFailure {
        expected: Thumbprint,
        anchored: Option<Thumbprint>,
    },

    #[error("Trust anchor unreachable: {0}")]
    AnchorUnreachable(String),
}

fn display_anchored(anchored: &Option<Thumbprint>) -> String {
    anchored
        .map(|t| t.to_hex())
        .unwrap_or_else(|| "(none)".to_string())
}

impl Rejection {
    /// Taxonomy entry for this rejection
    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::Malformed(_) => ErrorKind::Malformed,
            Rejection::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Rejection::Expired { .. } => ErrorKind::Expired,
            Rejection::Revoked(_) => ErrorKind::Revoked,
            Rejection::TrustIntegrityFailure { .. } => ErrorKind::TrustIntegrityFailure,
            Rejection::AnchorUnreachable(_) => ErrorKind::AnchorUnreachable,
        }
    }
}

impl From<TokenError> for Rejection {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::SignatureInvalid(msg) | TokenError::CryptoError(msg) => {
                Rejection::SignatureInvalid(msg)
            }
            other => Rejection::Malformed(other.to_string()),
        }
    }
}
