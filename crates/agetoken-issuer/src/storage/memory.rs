//! In-memory storage backend
//!
//! Default storage for development and tests. Data is lost on restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use agetoken_core::{DeviceBinding, TokenHash};

use super::{DeviceRevocation, IssuanceRecord, RevocationRecord, RevocationStore, StorageError};

#[derive(Debug, Default)]
struct State {
    revocations: HashMap<TokenHash, RevocationRecord>,
    /// Revocation order, for listing
    revocation_order: Vec<TokenHash>,
    devices: HashMap<DeviceBinding, DeviceRevocation>,
    generation: u64,
    issuances: HashMap<DeviceBinding, Vec<IssuanceRecord>>,
}

/// In-memory revocation store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn revoke(&self, record: RevocationRecord) -> Result<bool, StorageError> {
        let mut state = self.write();
        if state.revocations.contains_key(&record.token_hash) {
            return Ok(false);
        }
        info!(token_hash = %record.token_hash, reason = %record.reason, "Recorded token revocation");
        state.revocation_order.push(record.token_hash);
        state.revocations.insert(record.token_hash, record);
        Ok(true)
    }

    async fn get_revocation(&self, token_hash: &TokenHash) -> Result<Option<RevocationRecord>, StorageError> {
        Ok(self.read().revocations.get(token_hash).cloned())
    }

    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError> {
        let state = self.read();
        Ok(state
            .revocation_order
            .iter()
            .filter_map(|hash| state.revocations.get(hash).cloned())
            .collect())
    }

    async fn revoke_device(&self, record: DeviceRevocation) -> Result<bool, StorageError> {
        let mut state = self.write();
        if state.devices.contains_key(&record.device_id) {
            return Ok(false);
        }
        info!(device_id = %record.device_id, reason = %record.reason, "Recorded device revocation");
        state.devices.insert(record.device_id.clone(), record);
        Ok(true)
    }

    async fn is_device_revoked(&self, device_id: &DeviceBinding) -> Result<bool, StorageError> {
        Ok(self.read().devices.contains_key(device_id))
    }

    async fn list_device_revocations(&self) -> Result<Vec<DeviceRevocation>, StorageError> {
        Ok(self.read().devices.values().cloned().collect())
    }

    async fn load_generation(&self) -> Result<u64, StorageError> {
        Ok(self.read().generation)
    }

    async fn store_generation(&self, generation: u64, _reason: &str) -> Result<(), StorageError> {
        let mut state = self.write();
        state.generation = state.generation.max(generation);
        Ok(())
    }

    async fn record_issuance(&self, record: IssuanceRecord) -> Result<(), StorageError> {
        self.write()
            .issuances
            .entry(record.device_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_issuances(&self, device_id: &DeviceBinding) -> Result<Vec<IssuanceRecord>, StorageError> {
        Ok(self.read().issuances.get(device_id).cloned().unwrap_or_default())
    }
}
