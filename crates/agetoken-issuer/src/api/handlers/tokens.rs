//! Token minting and verification handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agetoken_core::{DeviceBinding, TokenHash};

use super::AppState;
use crate::api::error::ApiError;
use crate::core::{ErrorKind, Rejection, RevocationCause, VerifiedToken};

/// Request to mint a token for an attested device
#[derive(Debug, Deserialize)]
pub struct MintRequest {
    /// Attested device public key, standard base64
    pub device_public_key: String,
}

/// Freshly minted token
#[derive(Debug, Serialize)]
pub struct MintResponse {
    pub token: String,
    pub token_hash: TokenHash,
    pub device_id: DeviceBinding,
    pub age_over: u8,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Mint a token
///
/// POST /v1/tokens/mint
///
/// Attestation happens upstream; this endpoint trusts that the device key
/// it receives was attested.
pub async fn mint_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MintRequest>,
) -> Result<Json<MintResponse>, ApiError> {
    let device_key = STANDARD.decode(request.device_public_key.trim())?;
    if device_key.is_empty() {
        return Err(ApiError::BadRequest("device_public_key is empty".into()));
    }
    let device = DeviceBinding::from_device_public_key(&device_key);

    let minted = state.issuer.mint(&device).await?;

    Ok(Json(MintResponse {
        expires_at: minted.expires_at(),
        age_over: minted.claims.age_over,
        generation: minted.claims.gen,
        token_hash: minted.token_hash,
        token: minted.token.into_string(),
        device_id: device,
    }))
}

/// Request to verify a token
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// Why verification failed
#[derive(Debug, Serialize)]
pub struct VerifyError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<RevocationCause>,
}

/// Verification result
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<VerifiedToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<VerifyError>,
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection.kind() {
        ErrorKind::Malformed => StatusCode::BAD_REQUEST,
        ErrorKind::SignatureInvalid => StatusCode::UNAUTHORIZED,
        ErrorKind::TrustIntegrityFailure | ErrorKind::AnchorUnreachable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::OK,
    }
}

/// Verify a token
///
/// POST /v1/tokens/verify
///
/// Always answers with a `VerifyResponse` body. Expired and revoked tokens
/// are ordinary answers (200); the status code only signals malformed input,
/// bad signatures and trust failures.
pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> (StatusCode, Json<VerifyResponse>) {
    match state.verifier.verify(&request.token).await {
        Ok(verified) => (
            StatusCode::OK,
            Json(VerifyResponse {
                valid: true,
                claims: Some(verified),
                error: None,
            }),
        ),
        Err(rejection) => {
            let revocation = match &rejection {
                Rejection::Revoked(cause) => Some(cause.clone()),
                _ => None,
            };
            (
                rejection_status(&rejection),
                Json(VerifyResponse {
                    valid: false,
                    claims: None,
                    error: Some(VerifyError {
                        kind: rejection.kind(),
                        message: rejection.to_string(),
                        revocation,
                    }),
                }),
            )
        }
    }
}
