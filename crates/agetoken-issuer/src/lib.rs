//! Age Token Issuer Service
//!
//! Mints device-bound age tokens, verifies them against the trust anchor and
//! the revocation state, and publishes revocation roots.
//!
//! ## Verification
//!
//! A token is accepted only when the trust anchor pins the issuer's current
//! key thumbprint, the signature verifies, `iss`/`aud` match, the token has
//! not expired, and neither the token, its device nor its generation is
//! revoked. The anchor check runs first: a re-pinned anchor rejects every
//! token.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with key id and revocation counts
//! - `POST /v1/tokens/mint` - Mint a token for an attested device key
//! - `POST /v1/tokens/verify` - Verify a token
//! - `POST /v1/revocations` - Revoke a token and publish the new root
//! - `GET /v1/revocations/root` - Local and anchored revocation roots
//! - `GET /v1/revocations/{token_hash}` - Revocation status
//! - `GET /v1/revocations/{token_hash}/proof` - Merkle inclusion proof
//! - `POST /v1/revocations/device` - Revoke every token of a device
//! - `GET /v1/generation` - Current mint generation
//! - `POST /v1/generation/bump` - Revoke all outstanding tokens
//! - `GET /.well-known/jwks.json` - Public keys
//! - `GET /v1/issuer/info` - Issuer identity and trust anchor status
//! - `POST /v1/issuer/thumbprint/publish` - Pin the current key on the anchor
//!   (409 if the anchor pins a foreign key)
//! - `POST /v1/issuer/keys/rotate` - Replace the signing key and pin the new one

pub mod api;
pub mod config;
pub mod core;
pub mod keys;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::IssuerConfig;
pub use keys::KeyStore;
pub use storage::{FileStore, MemoryStore, RevocationStore, StorageError};
