//! Bulletin board state and transition types

use agetoken_core::{IssuerPublicKey, MerkleRoot, Thumbprint};
use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::error::{AnchorError, Result};

/// Domain separator for transition signatures
const TRANSITION_CONTEXT: &str = "agetoken-anchor/transition/v1";

/// State currently published on the anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedState {
    /// Pinned issuer key thumbprint; `None` until first published
    #[serde(default)]
    pub thumbprint: Option<Thumbprint>,

    /// Latest revocation Merkle root
    pub revocation_root: MerkleRoot,

    /// Address of the publisher that first claimed this board
    #[serde(default)]
    pub issuer_address: Option<String>,

    /// Number of accepted transitions
    pub sequence: u64,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            thumbprint: None,
            revocation_root: MerkleRoot::EMPTY,
            issuer_address: None,
            sequence: 0,
        }
    }
}

/// A single value change proposed to the anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StateUpdate {
    /// Pin a new issuer key thumbprint
    Thumbprint(Thumbprint),
    /// Publish a new revocation root
    RevocationRoot(MerkleRoot),
}

impl StateUpdate {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            StateUpdate::Thumbprint(_) => "thumbprint",
            StateUpdate::RevocationRoot(_) => "revocation_root",
        }
    }

    fn value_hex(&self) -> String {
        match self {
            StateUpdate::Thumbprint(t) => t.to_hex(),
            StateUpdate::RevocationRoot(r) => r.to_hex(),
        }
    }
}

/// A signed state transition, as submitted to the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The proposed change
    pub update: StateUpdate,

    /// Publisher address, derived from `publisher_key`
    pub publisher: String,

    /// Publisher Ed25519 public key, hex
    pub publisher_key: String,

    /// Single-use nonce; boards reject replays
    pub nonce: String,

    /// When the publisher signed the transition
    pub signed_at: DateTime<Utc>,

    /// Ed25519 signature over [`StateTransition::signing_bytes`], hex
    pub signature: String,
}

impl StateTransition {
    /// Canonical bytes covered by the signature
    pub fn signing_bytes(
        update: &StateUpdate,
        publisher: &str,
        nonce: &str,
        signed_at: &DateTime<Utc>,
    ) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}|{}",
            TRANSITION_CONTEXT,
            update.kind(),
            update.value_hex(),
            publisher,
            nonce,
            signed_at.timestamp()
        )
        .into_bytes()
    }

    /// Check the signature and that the address matches the key
    ///
    /// Authorization (whether this publisher may write) is up to the board.
    pub fn verify_signature(&self) -> Result<()> {
        let key_bytes: [u8; 32] = hex::decode(&self.publisher_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| AnchorError::PublishRejected("malformed publisher key".into()))?;
        let public_key = IssuerPublicKey::from_bytes(&key_bytes)
            .map_err(|e| AnchorError::PublishRejected(e.to_string()))?;

        let expected = crate::identity::address_for_key(&key_bytes);
        if expected != self.publisher {
            return Err(AnchorError::PublishRejected(format!(
                "publisher address {} does not match key (expected {})",
                self.publisher, expected
            )));
        }

        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| AnchorError::PublishRejected("malformed signature".into()))?;
        let message = Self::signing_bytes(&self.update, &self.publisher, &self.nonce, &self.signed_at);
        public_key
            .verify(&message, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| AnchorError::PublishRejected("transition signature invalid".into()))
    }
}

/// Acknowledgement of an accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Board-assigned transaction id
    pub tx_id: String,

    /// Sequence number after applying the transition
    pub sequence: u64,

    /// When the board accepted it
    pub accepted_at: DateTime<Utc>,
}
