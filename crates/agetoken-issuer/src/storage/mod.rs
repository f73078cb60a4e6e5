//! Durable revocation storage
//!
//! The in-memory Merkle tree is derived state; this module holds the
//! append-only record it is rebuilt from on startup:
//!
//! - revoked token hashes, with time and reason
//! - revoked devices
//! - the mint generation
//! - issuance records, so a device's tokens can be traced
//!
//! Entries are never removed.

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use agetoken_core::{DeviceBinding, TokenHash};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// A revoked token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub token_hash: TokenHash,
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}

/// A revoked device; every token bound to it is rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRevocation {
    pub device_id: DeviceBinding,
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}

/// A minted token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    pub token_hash: TokenHash,
    pub device_id: DeviceBinding,
    pub jti: String,
    pub generation: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage backend for revocation state
///
/// Implementations must be thread-safe and must persist an entry before
/// returning `Ok`.
#[async_trait]
pub trait RevocationStore: Send + Sync + Debug {
    // =========================================================================
    // Token revocation
    // =========================================================================

    /// Record a revocation. Returns `false` if the hash was already revoked,
    /// in which case the original record is kept.
    async fn revoke(&self, record: RevocationRecord) -> Result<bool, StorageError>;

    /// Revocation record for a hash
    async fn get_revocation(&self, token_hash: &TokenHash) -> Result<Option<RevocationRecord>, StorageError>;

    /// All revocations, in insertion order
    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError>;

    // =========================================================================
    // Device revocation
    // =========================================================================

    /// Record a device revocation. Returns `false` if already revoked.
    async fn revoke_device(&self, record: DeviceRevocation) -> Result<bool, StorageError>;

    /// Whether a device is revoked
    async fn is_device_revoked(&self, device_id: &DeviceBinding) -> Result<bool, StorageError>;

    /// All device revocations
    async fn list_device_revocations(&self) -> Result<Vec<DeviceRevocation>, StorageError>;

    // =========================================================================
    // Generation
    // =========================================================================

    /// Persisted mint generation (0 if never bumped)
    async fn load_generation(&self) -> Result<u64, StorageError>;

    /// Persist a generation. Lower values than the stored one are ignored.
    async fn store_generation(&self, generation: u64, reason: &str) -> Result<(), StorageError>;

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Record a minted token
    async fn record_issuance(&self, record: IssuanceRecord) -> Result<(), StorageError>;

    /// Tokens minted for a device
    async fn list_issuances(&self, device_id: &DeviceBinding) -> Result<Vec<IssuanceRecord>, StorageError>;
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
