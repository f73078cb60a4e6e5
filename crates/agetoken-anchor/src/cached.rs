//! TTL cache in front of anchor reads
//!
//! Verification re-reads the anchor on every call. Where that is too costly a
//! short TTL can be configured explicitly; a zero TTL disables caching, and
//! any successful publish through this wrapper invalidates the cached state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use crate::anchor::TrustAnchor;
use crate::error::Result;
use crate::types::{PublishedState, StateTransition, TransactionReceipt};

/// Caching wrapper around another anchor
pub struct CachedAnchor {
    inner: Arc<dyn TrustAnchor>,
    cache: Option<Cache<(), PublishedState>>,
}

impl CachedAnchor {
    /// Wrap `inner`, caching reads for `ttl` (zero disables caching)
    pub fn new(inner: Arc<dyn TrustAnchor>, ttl: Duration) -> Self {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .time_to_live(ttl)
                .max_capacity(1)
                .build()
        });
        Self { inner, cache }
    }

    /// Drop any cached state
    pub async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&()).await;
        }
    }
}

#[async_trait]
impl TrustAnchor for CachedAnchor {
    async fn read_state(&self) -> Result<PublishedState> {
        let Some(cache) = &self.cache else {
            return self.inner.read_state().await;
        };

        if let Some(state) = cache.get(&()).await {
            debug!(sequence = state.sequence, "Using cached anchor state");
            return Ok(state);
        }

        // Errors are not cached
        let state = self.inner.read_state().await?;
        cache.insert((), state.clone()).await;
        Ok(state)
    }

    async fn submit(&self, transition: StateTransition) -> Result<TransactionReceipt> {
        let receipt = self.inner.submit(transition).await?;
        self.invalidate().await;
        Ok(receipt)
    }

    fn description(&self) -> String {
        match &self.cache {
            Some(_) => format!("{} (cached)", self.inner.description()),
            None => self.inner.description(),
        }
    }
}
