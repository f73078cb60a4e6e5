//! Publisher identity
//!
//! Writes to the anchor are signed by a dedicated Ed25519 key that is
//! distinct from the token signing key. Compromise of one does not grant the
//! other: a stolen token key cannot re-pin the thumbprint, and a stolen
//! publisher key cannot mint tokens.

use std::fmt;
use std::path::Path;

use agetoken_core::digest::sha256;
use agetoken_core::{keys, SigningKeypair};
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{StateTransition, StateUpdate};

/// Number of digest bytes kept in an address
const ADDRESS_BYTES: usize = 20;

/// Derive the board address of an Ed25519 public key
///
/// `0x` followed by the hex of the first 20 bytes of SHA-256(public key).
pub fn address_for_key(public_key: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(&sha256(public_key)[..ADDRESS_BYTES]))
}

/// Key and address used to authenticate anchor transitions
#[derive(Clone)]
pub struct PublisherIdentity {
    keypair: SigningKeypair,
    address: String,
}

impl fmt::Debug for PublisherIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PublisherIdentity {
    /// Wrap an existing keypair
    pub fn new(keypair: SigningKeypair) -> Self {
        let address = address_for_key(&keypair.public_key().to_bytes());
        Self { keypair, address }
    }

    /// Generate a fresh identity
    pub fn generate() -> Self {
        Self::new(SigningKeypair::generate())
    }

    /// Load the identity key file, creating it on first use
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        Ok(Self::new(keys::load_or_generate(path)?))
    }

    /// Board address of this identity
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign `update` into a transition with a fresh nonce
    pub fn sign(&self, update: StateUpdate) -> StateTransition {
        self.sign_at(update, Utc::now())
    }

    pub(crate) fn sign_at(&self, update: StateUpdate, signed_at: DateTime<Utc>) -> StateTransition {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let message = StateTransition::signing_bytes(&update, &self.address, &nonce, &signed_at);
        let signature = self.keypair.sign(&message);

        StateTransition {
            update,
            publisher: self.address.clone(),
            publisher_key: hex::encode(self.keypair.public_key().to_bytes()),
            nonce,
            signed_at,
            signature: hex::encode(signature.to_bytes()),
        }
    }
}
