//! Mint generation counter
//!
//! Every token carries the generation it was minted under. Bumping the
//! generation revokes every outstanding token at once without listing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::storage::{RevocationStore, StorageError};

/// Current generation, persisted through the revocation store
#[derive(Debug)]
pub struct GenerationCounter {
    current: AtomicU64,
    store: Arc<dyn RevocationStore>,
    // Serializes bumps so old/new pairs never interleave
    bump_lock: Mutex<()>,
}

impl GenerationCounter {
    /// Load the persisted generation
    pub async fn load(store: Arc<dyn RevocationStore>) -> Result<Self, StorageError> {
        let current = store.load_generation().await?;
        info!(generation = current, "Loaded mint generation");
        Ok(Self {
            current: AtomicU64::new(current),
            store,
            bump_lock: Mutex::new(()),
        })
    }

    /// Generation stamped on new tokens
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Advance the generation, revoking every token minted before now
    ///
    /// The new value is persisted before it takes effect. Returns
    /// `(old, new)`.
    pub async fn bump(&self, reason: &str) -> Result<(u64, u64), StorageError> {
        let _guard = self.bump_lock.lock().await;
        let old = self.current();
        let new = old
            .checked_add(1)
            .ok_or_else(|| StorageError::Serialization("generation counter overflow".into()))?;

        self.store.store_generation(new, reason).await?;
        self.current.store(new, Ordering::SeqCst);

        warn!(
            old_generation = old,
            new_generation = new,
            reason = %reason,
            "Mint generation bumped; all earlier tokens are revoked"
        );
        Ok((old, new))
    }
}
