//! Compact signed token codec
//!
//! Tokens are compact JWS (JWT) values signed with Ed25519:
//!
//! ```text
//! base64url(header) "." base64url(claims) "." base64url(ed25519 signature)
//! ```
//!
//! Signing and verification go through `jsonwebtoken` restricted to
//! `EdDSA`. Its own time checks are off: expiry is inclusive of `exp` and is
//! judged by the verifier against its clock. On top of the crate this module
//! enforces the length cap, the `kid` match, rejection of `crit` headers and
//! the closed claims schema. The signature is checked before the payload is
//! decoded, so any change to the payload segment surfaces as
//! [`TokenError::SignatureInvalid`] rather than as a parse error.
//!
//! This module performs no expiry or revocation checks.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::claims::AgeClaims;
use crate::error::{Result, TokenError};
use crate::keys::{IssuerPublicKey, SigningKeypair, JWK_ALG};
use crate::revocation::TokenHash;

/// Token type carried in the header
pub const TOKEN_TYP: &str = "JWT";

/// Upper bound on accepted token length, well above any legitimate token
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

/// Ed25519 signature length in bytes
const SIGNATURE_LEN: usize = 64;

/// Header fields the verifier relies on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenHeader {
    /// Signature algorithm, always `EdDSA`
    pub alg: String,

    /// Token type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Key id: first 16 hex characters of the issuer thumbprint
    pub kid: String,
}

/// The one header member `jsonwebtoken::Header` does not model
#[derive(Deserialize)]
struct CriticalExtensions {
    #[serde(default)]
    crit: Vec<String>,
}

/// A serialized, signed token as handed to the device
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SerializedToken(String);

impl SerializedToken {
    /// Wrap a token string without checking it
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the token text
    pub fn into_string(self) -> String {
        self.0
    }

    /// Revocation hash of this token
    pub fn hash(&self) -> TokenHash {
        TokenHash::of_token(&self.0)
    }
}

impl fmt::Display for SerializedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SerializedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are bearer credentials: show the hash, not the text
        write!(f, "SerializedToken({})", self.hash())
    }
}

/// Reject input that cannot be a compact token before handing it to the crate
///
/// The signature length is checked here so a truncated signature reads as
/// malformed rather than as a failed verification.
fn check_framing(token: &str) -> Result<&str> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(TokenError::Malformed(format!(
            "token exceeds {} bytes",
            MAX_TOKEN_LEN
        )));
    }

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed(
            "expected three dot-separated segments".into(),
        ));
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(TokenError::Malformed("empty token segment".into()));
    }

    let signature_len = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| TokenError::Malformed(format!("signature is not base64url: {}", e)))?
        .len();
    if signature_len != SIGNATURE_LEN {
        return Err(TokenError::Malformed(format!(
            "signature must be {} bytes",
            SIGNATURE_LEN
        )));
    }
    Ok(header)
}

fn reject_critical_extensions(header_segment: &str) -> Result<()> {
    let bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|e| TokenError::Malformed(format!("header is not base64url: {}", e)))?;
    let extensions: CriticalExtensions = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("invalid header JSON: {}", e)))?;
    if !extensions.crit.is_empty() {
        return Err(TokenError::Malformed(format!(
            "unsupported critical extensions: {:?}",
            extensions.crit
        )));
    }
    Ok(())
}

/// Signature-only validation: EdDSA, no registered-claim checks
fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Sign `claims` with `keypair` and serialize the token
pub fn encode(claims: &AgeClaims, keypair: &SigningKeypair) -> Result<SerializedToken> {
    claims.validate()?;

    let mut header = Header::new(Algorithm::EdDSA);
    header.typ = Some(TOKEN_TYP.to_string());
    header.kid = Some(keypair.kid());

    let token = jsonwebtoken::encode(&header, claims, &keypair.encoding_key()?)?;
    Ok(SerializedToken(token))
}

/// Parse the header without verifying anything else
///
/// Used to select the verification key by `kid`. Never trust the result
/// for anything beyond key selection.
pub fn peek_header(token: &str) -> Result<TokenHeader> {
    let header_segment = check_framing(token)?;
    let header = jsonwebtoken::decode_header(token)?;

    if header.alg != Algorithm::EdDSA {
        return Err(TokenError::Malformed(format!(
            "unsupported algorithm '{:?}', expected '{}'",
            header.alg, JWK_ALG
        )));
    }
    reject_critical_extensions(header_segment)?;

    let kid = header
        .kid
        .ok_or_else(|| TokenError::MissingField("kid".into()))?;
    Ok(TokenHeader {
        alg: JWK_ALG.to_string(),
        typ: header.typ,
        kid,
    })
}

/// Verify the signature of `token` under `public_key` and return its claims
pub fn decode_and_verify(token: &str, public_key: &IssuerPublicKey) -> Result<AgeClaims> {
    let header = peek_header(token)?;
    if header.kid != public_key.kid() {
        return Err(TokenError::SignatureInvalid(format!(
            "key id mismatch: expected '{}', got '{}'",
            public_key.kid(),
            header.kid
        )));
    }

    let claims = jsonwebtoken::decode::<AgeClaims>(token, &public_key.decoding_key()?, &validation())?.claims;
    claims
        .validate()
        .map_err(|e| TokenError::Malformed(e.to_string()))?;

    Ok(claims)
}
