//! API request handlers

pub mod issuer;
pub mod revocations;
pub mod tokens;

pub use issuer::{
    issuer_info, jwks, publish_thumbprint, rotate_key, IssuerInfoResponse, PublishThumbprintResponse,
    RotateKeyResponse,
};
pub use revocations::{
    bump_generation, get_generation, revocation_proof, revocation_root, revocation_status,
    revoke_device, revoke_token, BumpGenerationRequest, BumpGenerationResponse, GenerationResponse,
    RevocationProofResponse, RevocationRootResponse, RevocationStatusResponse, RevokeDeviceRequest,
    RevokeDeviceResponse, RevokeRequest, RevokeResponse,
};
pub use tokens::{mint_token, verify_token, MintRequest, MintResponse, VerifyRequest, VerifyResponse};

use std::path::PathBuf;
use std::sync::Arc;

use agetoken_core::Clock;

use crate::config::IssuerConfig;
use crate::core::{
    AnchorLink, GenerationCounter, IssuancePolicy, Issuer, RevocationService, Verifier,
    VerifierPolicy,
};
use crate::keys::KeyStore;
use crate::storage::{RevocationStore, StorageError};

/// Application state shared across handlers
pub struct AppState {
    /// Issuer signing keys
    pub keys: Arc<KeyStore>,
    pub issuer: Issuer,
    pub verifier: Verifier,
    pub revocations: Arc<RevocationService>,
    pub generation: Arc<GenerationCounter>,
    pub anchor: AnchorLink,
    pub clock: Arc<dyn Clock>,
    /// Where a rotated signing key is written; `None` keeps it in memory
    pub key_file: Option<PathBuf>,
}

impl AppState {
    /// Wire the service together from its parts
    ///
    /// Loads the generation and the revocation set from `store`.
    pub async fn build(
        config: &IssuerConfig,
        keys: Arc<KeyStore>,
        store: Arc<dyn RevocationStore>,
        anchor: AnchorLink,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let generation = Arc::new(GenerationCounter::load(Arc::clone(&store)).await?);
        let revocations = Arc::new(RevocationService::load(Arc::clone(&store), anchor.clone()).await?);

        let issuer = Issuer::new(
            Arc::clone(&keys),
            Arc::clone(&generation),
            store,
            Arc::clone(&clock),
            IssuancePolicy {
                issuer: config.issuer.clone(),
                audience: config.audience.clone(),
                age_over: config.age_over,
                lifetime_secs: config.token_lifetime_secs,
            },
        );
        let verifier = Verifier::new(
            Arc::clone(&keys),
            Arc::clone(&revocations),
            Arc::clone(&generation),
            anchor.clone(),
            Arc::clone(&clock),
            VerifierPolicy {
                issuer: config.issuer.clone(),
                audience: config.audience.clone(),
                failure_policy: config.anchor_failure_policy,
                accept_legacy: config.accept_legacy,
            },
        );

        Ok(Self {
            keys,
            issuer,
            verifier,
            revocations,
            generation,
            anchor,
            clock,
            key_file: None,
        })
    }

    /// Persist rotated signing keys to `path`
    pub fn with_key_file(mut self, path: PathBuf) -> Self {
        self.key_file = Some(path);
        self
    }
}
