//! The trust anchor abstraction

use agetoken_core::{MerkleRoot, Thumbprint};
use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::identity::PublisherIdentity;
use crate::types::{PublishedState, StateTransition, StateUpdate, TransactionReceipt};

/// An append-only, authenticated bulletin board
///
/// The anchor is the out-of-band source of truth that verifiers use to
/// decide which issuer key to trust and which revocation root is current.
/// Implementations only need to provide [`read_state`](Self::read_state)
/// and [`submit`](Self::submit); the typed accessors are derived from them.
#[async_trait]
pub trait TrustAnchor: Send + Sync {
    /// Read the full published state
    async fn read_state(&self) -> Result<PublishedState>;

    /// Submit a signed transition. Each accepted transition increments the
    /// sequence by exactly one.
    async fn submit(&self, transition: StateTransition) -> Result<TransactionReceipt>;

    /// Human-readable description for logs and `/v1/issuer/info`
    fn description(&self) -> String {
        "trust anchor".to_string()
    }

    /// Currently pinned issuer thumbprint
    async fn read_thumbprint(&self) -> Result<Option<Thumbprint>> {
        Ok(self.read_state().await?.thumbprint)
    }

    /// Currently published revocation root
    async fn read_revocation_root(&self) -> Result<MerkleRoot> {
        Ok(self.read_state().await?.revocation_root)
    }

    /// Pin `thumbprint` as the trusted issuer key
    async fn publish_thumbprint(
        &self,
        thumbprint: Thumbprint,
        identity: &PublisherIdentity,
    ) -> Result<TransactionReceipt> {
        let receipt = self
            .submit(identity.sign(StateUpdate::Thumbprint(thumbprint)))
            .await?;
        info!(
            thumbprint = %thumbprint,
            publisher = %identity.address(),
            tx_id = %receipt.tx_id,
            sequence = receipt.sequence,
            "Published issuer thumbprint"
        );
        Ok(receipt)
    }

    /// Publish a new revocation root
    async fn publish_revocation_root(
        &self,
        root: MerkleRoot,
        identity: &PublisherIdentity,
    ) -> Result<TransactionReceipt> {
        let receipt = self
            .submit(identity.sign(StateUpdate::RevocationRoot(root)))
            .await?;
        info!(
            root = %root,
            publisher = %identity.address(),
            tx_id = %receipt.tx_id,
            sequence = receipt.sequence,
            "Published revocation root"
        );
        Ok(receipt)
    }
}
