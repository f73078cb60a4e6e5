//! Issuer key and trust anchor handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::{info, warn};

use agetoken_core::Thumbprint;

use super::AppState;
use crate::api::error::ApiError;
use crate::core::jobs::{self, ThumbprintSync};
use crate::core::TrustStatus;
use crate::keys::Jwks;

/// Public keys that currently verify
///
/// GET /.well-known/jwks.json
pub async fn jwks(State(state): State<Arc<AppState>>) -> Json<Jwks> {
    Json(state.keys.jwks(state.clock.now()))
}

/// Issuer identity and trust anchor status
#[derive(Debug, Serialize)]
pub struct IssuerInfoResponse {
    pub issuer: String,
    pub audience: String,
    pub kid: String,
    pub thumbprint: Thumbprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_thumbprint: Option<Thumbprint>,
    pub trust_anchor_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_anchor_error: Option<String>,
    /// Anchor backend description
    pub anchor: String,
    pub publisher: String,
    pub age_over: u8,
    pub token_lifetime_secs: i64,
    pub jwks_url: String,
}

/// Get issuer info
///
/// GET /v1/issuer/info
pub async fn issuer_info(State(state): State<Arc<AppState>>) -> Json<IssuerInfoResponse> {
    let thumbprint = state.keys.current_thumbprint();
    let status = state.verifier.trust_status().await;
    let anchored_thumbprint = match &status {
        TrustStatus::Verified => Some(thumbprint),
        TrustStatus::Mismatch { anchored } => Some(*anchored),
        TrustStatus::NotPublished | TrustStatus::Unreachable(_) => None,
    };
    let trust_anchor_error = match &status {
        TrustStatus::Unreachable(reason) => Some(reason.clone()),
        _ => None,
    };
    let policy = state.issuer.policy();

    Json(IssuerInfoResponse {
        issuer: policy.issuer.clone(),
        audience: policy.audience.clone(),
        kid: thumbprint.kid(),
        thumbprint,
        anchored_thumbprint,
        trust_anchor_status: status.as_str().to_string(),
        trust_anchor_error,
        anchor: state.anchor.description(),
        publisher: state.anchor.publisher_address().to_string(),
        age_over: policy.age_over,
        token_lifetime_secs: policy.lifetime_secs,
        jwks_url: "/.well-known/jwks.json".to_string(),
    })
}

/// Response from a thumbprint publish
#[derive(Debug, Serialize)]
pub struct PublishThumbprintResponse {
    pub thumbprint: Thumbprint,
    /// `false` if the anchor already pinned this key
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// Pin the current key on the trust anchor
///
/// POST /v1/issuer/thumbprint/publish
///
/// Publishes only when the anchor pins nothing, this key, or a key this
/// service rotated out. A foreign pin is left intact and answered with 409.
pub async fn publish_thumbprint(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PublishThumbprintResponse>, ApiError> {
    let thumbprint = state.keys.current_thumbprint();
    match jobs::ensure_thumbprint(&state.keys, &state.anchor).await? {
        ThumbprintSync::AlreadyPinned => Ok(Json(PublishThumbprintResponse {
            thumbprint,
            published: false,
            tx_id: None,
            sequence: None,
        })),
        ThumbprintSync::Published(receipt) => {
            info!(thumbprint = %thumbprint, tx_id = %receipt.tx_id, "Thumbprint published over API");
            Ok(Json(PublishThumbprintResponse {
                thumbprint,
                published: true,
                tx_id: Some(receipt.tx_id),
                sequence: Some(receipt.sequence),
            }))
        }
        ThumbprintSync::Conflict => {
            warn!(thumbprint = %thumbprint, "SECURITY: Thumbprint publish refused, anchor pins a foreign key");
            Err(ApiError::Conflict(
                "Trust anchor pins a different issuer key".to_string(),
            ))
        }
    }
}

/// Response from a key rotation
#[derive(Debug, Serialize)]
pub struct RotateKeyResponse {
    pub previous_thumbprint: Thumbprint,
    pub thumbprint: Thumbprint,
    pub kid: String,
    /// Whether the new key is pinned on the anchor
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
}

/// Replace the signing key
///
/// POST /v1/issuer/keys/rotate
///
/// The old key keeps verifying for the configured grace window. If the
/// anchor cannot be updated the rotation still stands; a later thumbprint
/// publish pins the new key.
pub async fn rotate_key(State(state): State<Arc<AppState>>) -> Result<Json<RotateKeyResponse>, ApiError> {
    let rotation = jobs::rotate_signing_key(
        &state.keys,
        &state.anchor,
        state.key_file.as_deref(),
        state.clock.now(),
    )
    .await?;

    let (published, tx_id, publish_error) = match rotation.publish {
        Ok(ThumbprintSync::Published(receipt)) => (true, Some(receipt.tx_id), None),
        Ok(ThumbprintSync::AlreadyPinned) => (true, None, None),
        Ok(ThumbprintSync::Conflict) => (false, None, Some("trust anchor pins a different issuer key".to_string())),
        Err(e) => (false, None, Some(e.to_string())),
    };

    Ok(Json(RotateKeyResponse {
        previous_thumbprint: rotation.previous,
        thumbprint: rotation.current,
        kid: rotation.current.kid(),
        published,
        tx_id,
        publish_error,
    }))
}
