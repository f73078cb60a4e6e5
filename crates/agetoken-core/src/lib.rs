//! # Age Token Core
//!
//! Core types and cryptographic primitives for issuing and verifying
//! device-bound age tokens.
//!
//! ## Key Concepts
//!
//! - **Signing keypair**: the issuer's Ed25519 key, persisted as a JWK file
//! - **Thumbprint**: SHA-256 over the canonical public JWK, pinned on the trust anchor
//! - **Age claims**: a fixed, versioned claim set asserting `age_over` for one device
//! - **Compact token**: `header.payload.signature`, base64url, EdDSA signature
//! - **Revocation tree**: sorted set of revoked token hashes summarised by a Merkle root
//!
//! This crate is pure: no network, no clocks beyond the [`clock::Clock`] trait,
//! and the only filesystem access is the key file in [`keys`].

pub mod claims;
pub mod clock;
pub mod digest;
pub mod error;
pub mod keys;
pub mod revocation;
pub mod token;

pub use claims::{AgeClaims, ClaimsBuilder, DeviceBinding, CLAIMS_VERSION};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{KeyLoadError, Result, TokenError};
pub use keys::{IssuerPublicKey, PublicJwk, SigningKeypair, Thumbprint};
pub use revocation::{MerkleProof, MerkleRoot, RevocationTree, TokenHash};
pub use token::{SerializedToken, TokenHeader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
