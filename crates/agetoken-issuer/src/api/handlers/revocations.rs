//! Revocation and generation handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agetoken_core::{DeviceBinding, MerkleProof, MerkleRoot, TokenHash};

use super::AppState;
use crate::api::error::ApiError;

const DEFAULT_REASON: &str = "unspecified";

fn reason_or_default(reason: Option<String>) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REASON.to_string())
}

// =============================================================================
// Token revocation
// =============================================================================

/// Request to revoke one token
///
/// Exactly one of `token_hash` (hex SHA-256 of the token) or `token` (the
/// token itself) must be given.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token_hash: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response from token revocation
#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub newly_revoked: bool,
    pub token_hash: TokenHash,
    pub merkle_root: MerkleRoot,
    /// Whether the new root reached the trust anchor
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
    pub total_revoked: usize,
}

/// Revoke a token
///
/// POST /v1/revocations
///
/// The revocation is durable once this returns, even when publishing the
/// root fails; the root sync job retries the publish.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let token_hash = match (request.token_hash.as_deref(), request.token.as_deref()) {
        (Some(hash), None) => TokenHash::from_hex(hash.trim())?,
        (None, Some(token)) => TokenHash::of_token(token.trim()),
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of token_hash or token is required".into(),
            ))
        }
    };
    let reason = reason_or_default(request.reason);

    let outcome = state.revocations.revoke(token_hash, &reason).await?;

    Ok(Json(RevokeResponse {
        revoked: true,
        newly_revoked: outcome.newly_revoked,
        token_hash: outcome.token_hash,
        merkle_root: outcome.root,
        published: outcome.published(),
        tx_id: outcome.receipt.as_ref().map(|r| r.tx_id.clone()),
        publish_error: outcome.publish_error.as_ref().map(|e| e.to_string()),
        total_revoked: outcome.total_revoked,
    }))
}

/// Current revocation root
#[derive(Debug, Serialize)]
pub struct RevocationRootResponse {
    pub root: MerkleRoot,
    pub total_revoked: usize,
    /// Root held by the trust anchor; absent if it could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_root: Option<MerkleRoot>,
    pub in_sync: bool,
}

/// Get the revocation root
///
/// GET /v1/revocations/root
pub async fn revocation_root(State(state): State<Arc<AppState>>) -> Json<RevocationRootResponse> {
    let root = state.revocations.root();
    let anchored_root = match state.revocations.anchored_root().await {
        Ok(anchored) => Some(anchored),
        Err(e) => {
            warn!(error = %e, "Could not read anchored revocation root");
            None
        }
    };

    Json(RevocationRootResponse {
        root,
        total_revoked: state.revocations.len(),
        in_sync: anchored_root == Some(root),
        anchored_root,
    })
}

/// Revocation status of one hash
#[derive(Debug, Serialize)]
pub struct RevocationStatusResponse {
    pub token_hash: TokenHash,
    pub is_revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Check whether a token hash is revoked
///
/// GET /v1/revocations/{token_hash}
pub async fn revocation_status(
    State(state): State<Arc<AppState>>,
    Path(token_hash): Path<String>,
) -> Result<Json<RevocationStatusResponse>, ApiError> {
    let token_hash = TokenHash::from_hex(&token_hash)?;
    let record = state.revocations.get_revocation(&token_hash).await?;

    Ok(Json(RevocationStatusResponse {
        token_hash,
        is_revoked: state.revocations.is_revoked(&token_hash),
        revoked_at: record.as_ref().map(|r| r.revoked_at),
        reason: record.map(|r| r.reason),
    }))
}

/// Inclusion proof with the root it verifies against
#[derive(Debug, Serialize)]
pub struct RevocationProofResponse {
    pub root: MerkleRoot,
    pub proof: MerkleProof,
}

/// Merkle inclusion proof for a revoked hash
///
/// GET /v1/revocations/{token_hash}/proof
pub async fn revocation_proof(
    State(state): State<Arc<AppState>>,
    Path(token_hash): Path<String>,
) -> Result<Json<RevocationProofResponse>, ApiError> {
    let token_hash = TokenHash::from_hex(&token_hash)?;
    let proof = state
        .revocations
        .proof(&token_hash)
        .ok_or_else(|| ApiError::NotFound(format!("Token hash {} is not revoked", token_hash)))?;

    // Root recomputed after the proof; a concurrent revocation makes the
    // pair stale, so only return a pair that checks out.
    let root = state.revocations.root();
    if !proof.verify(&root) {
        return Err(ApiError::Internal("Revocation set changed, retry".into()));
    }

    Ok(Json(RevocationProofResponse { root, proof }))
}

// =============================================================================
// Device revocation
// =============================================================================

/// Request to revoke a device
#[derive(Debug, Deserialize)]
pub struct RevokeDeviceRequest {
    /// Device binding (hex SHA-256 of the device public key)
    pub device_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response from device revocation
#[derive(Debug, Serialize)]
pub struct RevokeDeviceResponse {
    pub device_id: DeviceBinding,
    pub revoked: bool,
    pub newly_revoked: bool,
}

/// Revoke every token bound to a device
///
/// POST /v1/revocations/device
pub async fn revoke_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevokeDeviceRequest>,
) -> Result<Json<RevokeDeviceResponse>, ApiError> {
    let device_id = DeviceBinding::from_hex(&request.device_id)?;
    let reason = reason_or_default(request.reason);

    let newly_revoked = state.revocations.revoke_device(device_id.clone(), &reason).await?;

    Ok(Json(RevokeDeviceResponse {
        device_id,
        revoked: true,
        newly_revoked,
    }))
}

// =============================================================================
// Generation
// =============================================================================

/// Request to bump the mint generation
#[derive(Debug, Default, Deserialize)]
pub struct BumpGenerationRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response from a generation bump
#[derive(Debug, Serialize)]
pub struct BumpGenerationResponse {
    pub old_generation: u64,
    pub new_generation: u64,
    pub reason: String,
}

/// Revoke every outstanding token by bumping the generation
///
/// POST /v1/generation/bump
pub async fn bump_generation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BumpGenerationRequest>,
) -> Result<Json<BumpGenerationResponse>, ApiError> {
    let reason = reason_or_default(request.reason);
    let (old_generation, new_generation) = state.generation.bump(&reason).await?;
    info!(old_generation, new_generation, "Generation bump requested over API");

    Ok(Json(BumpGenerationResponse {
        old_generation,
        new_generation,
        reason,
    }))
}

/// Current generation
#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub current_generation: u64,
}

/// Get the current mint generation
///
/// GET /v1/generation
pub async fn get_generation(State(state): State<Arc<AppState>>) -> Json<GenerationResponse> {
    Json(GenerationResponse {
        current_generation: state.generation.current(),
    })
}
