//! Token minting

use std::sync::Arc;

use agetoken_core::{token, AgeClaims, ClaimsBuilder, Clock, DeviceBinding, SerializedToken, TokenError, TokenHash};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::generation::GenerationCounter;
use crate::keys::KeyStore;
use crate::storage::{IssuanceRecord, RevocationStore, StorageError};

/// Claims policy applied to every minted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuancePolicy {
    pub issuer: String,
    pub audience: String,
    pub age_over: u8,
    pub lifetime_secs: i64,
}

/// Errors that can occur while minting
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("Device {0} is revoked")]
    DeviceRevoked(DeviceBinding),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: SerializedToken,
    pub token_hash: TokenHash,
    pub claims: AgeClaims,
}

impl MintedToken {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.expires_at()
    }
}

/// Mints tokens for attested devices
///
/// Never talks to the trust anchor: minting keeps working through anchor
/// outages, and verifiers decide what to trust.
pub struct Issuer {
    keys: Arc<KeyStore>,
    generation: Arc<GenerationCounter>,
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    policy: IssuancePolicy,
}

impl Issuer {
    pub fn new(
        keys: Arc<KeyStore>,
        generation: Arc<GenerationCounter>,
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
        policy: IssuancePolicy,
    ) -> Self {
        Self {
            keys,
            generation,
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &IssuancePolicy {
        &self.policy
    }

    /// Mint a token bound to `device`
    ///
    /// The device must already be attested; `device` is the hash of its
    /// public key. Revoked devices are refused.
    pub async fn mint(&self, device: &DeviceBinding) -> Result<MintedToken, IssueError> {
        if self.store.is_device_revoked(device).await? {
            warn!(device_id = %device, "Refused to mint for revoked device");
            return Err(IssueError::DeviceRevoked(device.clone()));
        }

        let keypair = self.keys.signing_key();
        let now = self.clock.now();
        let claims = ClaimsBuilder::new()
            .issuer(&self.policy.issuer)
            .audience(&self.policy.audience)
            .subject(device.clone())
            .age_over(self.policy.age_over)
            .issued_at(now)
            .lifetime_secs(self.policy.lifetime_secs)
            .generation(self.generation.current())
            .build()?;

        let token = token::encode(&claims, &keypair)?;
        let token_hash = token.hash();

        let record = IssuanceRecord {
            token_hash,
            device_id: device.clone(),
            jti: claims.jti.clone(),
            generation: claims.gen,
            issued_at: claims.issued_at().unwrap_or_else(Utc::now),
            expires_at: claims.expires_at().unwrap_or_else(Utc::now),
        };
        self.store.record_issuance(record).await?;

        info!(
            device_id = %device,
            token_hash = %token_hash,
            kid = %keypair.kid(),
            generation = claims.gen,
            exp = claims.exp,
            "Minted age token"
        );

        Ok(MintedToken {
            token,
            token_hash,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeviceRevocation, MemoryStore};
    use agetoken_core::{ManualClock, SigningKeypair};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    async fn issuer() -> (Issuer, Arc<KeyStore>, Arc<dyn RevocationStore>) {
        let keys = Arc::new(KeyStore::new(SigningKeypair::generate(), Duration::ZERO));
        let store: Arc<dyn RevocationStore> = Arc::new(MemoryStore::new());
        let generation = Arc::new(GenerationCounter::load(Arc::clone(&store)).await.unwrap());
        let issuer = Issuer::new(
            Arc::clone(&keys),
            generation,
            Arc::clone(&store),
            Arc::new(ManualClock::new(NOW)),
            IssuancePolicy {
                issuer: "age-token-issuer".into(),
                audience: "age-gated-sites".into(),
                age_over: 18,
                lifetime_secs: 86_400,
            },
        );
        (issuer, keys, store)
    }

    #[tokio::test]
    async fn test_mint_claims() {
        let (issuer, keys, _) = issuer().await;
        let device = DeviceBinding::from_device_public_key(b"deviceA");

        let minted = issuer.mint(&device).await.unwrap();

        assert_eq!(minted.claims.sub, device.as_str());
        assert_eq!(minted.claims.age_over, 18);
        assert_eq!(minted.claims.iat, NOW);
        assert_eq!(minted.claims.exp, NOW + 86_400);
        assert_eq!(minted.claims.gen, 0);
        assert_eq!(minted.token_hash, TokenHash::of_token(minted.token.as_str()));

        let public = keys.key_for_kid(&keys.current_kid(), NOW).unwrap();
        let decoded = token::decode_and_verify(minted.token.as_str(), &public).unwrap();
        assert_eq!(decoded, minted.claims);
    }

    #[tokio::test]
    async fn test_mint_records_issuance() {
        let (issuer, _, store) = issuer().await;
        let device = DeviceBinding::from_device_public_key(b"deviceA");

        let first = issuer.mint(&device).await.unwrap();
        let second = issuer.mint(&device).await.unwrap();
        assert_ne!(first.claims.jti, second.claims.jti);

        let issued = store.list_issuances(&device).await.unwrap();
        assert_eq!(issued.len(), 2);
        assert_eq!(issued[0].token_hash, first.token_hash);
    }

    #[tokio::test]
    async fn test_mint_refuses_revoked_device() {
        let (issuer, _, store) = issuer().await;
        let device = DeviceBinding::from_device_public_key(b"stolen");
        store
            .revoke_device(DeviceRevocation {
                device_id: device.clone(),
                revoked_at: Utc::now(),
                reason: "lost".into(),
            })
            .await
            .unwrap();

        assert!(matches!(
            issuer.mint(&device).await,
            Err(IssueError::DeviceRevoked(_))
        ));
    }
}
