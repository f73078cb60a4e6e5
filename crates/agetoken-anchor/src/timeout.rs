//! Bounded anchor calls
//!
//! Every call through [`TimeoutAnchor`] completes within the configured
//! duration or fails with [`AnchorError::Unreachable`]. Dropping the future
//! on timeout abandons the call; a publish that already reached the board
//! may still land, which is harmless because publishes carry absolute values.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::anchor::TrustAnchor;
use crate::error::{AnchorError, Result};
use crate::types::{PublishedState, StateTransition, TransactionReceipt};

/// Default bound on a single anchor call
pub const DEFAULT_ANCHOR_TIMEOUT: Duration = Duration::from_millis(5000);

/// Run `fut` with a deadline, mapping elapsed time to `Unreachable`
pub async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "Trust anchor call timed out");
            Err(AnchorError::Unreachable(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

/// Wrapper that bounds every call to `inner`
pub struct TimeoutAnchor {
    inner: Arc<dyn TrustAnchor>,
    timeout: Duration,
}

impl TimeoutAnchor {
    /// Bound calls to `inner` by `timeout`
    pub fn new(inner: Arc<dyn TrustAnchor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl TrustAnchor for TimeoutAnchor {
    async fn read_state(&self) -> Result<PublishedState> {
        bounded("read_state", self.timeout, self.inner.read_state()).await
    }

    async fn submit(&self, transition: StateTransition) -> Result<TransactionReceipt> {
        bounded("submit", self.timeout, self.inner.submit(transition)).await
    }

    fn description(&self) -> String {
        self.inner.description()
    }
}
