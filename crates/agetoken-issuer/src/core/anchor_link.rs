//! The service's connection to the trust anchor
//!
//! Every call is bounded by the configured timeout. Publishes also retry
//! transient failures; reads never do, since a verify waiting on retries is
//! worse than a prompt failure-policy decision.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agetoken_anchor::{
    publish_with_retry, PublishedState, PublisherIdentity, Result, RetryPolicy, TimeoutAnchor,
    TransactionReceipt, TrustAnchor,
};
use agetoken_core::{MerkleRoot, Thumbprint};

/// Bounded, retrying access to a [`TrustAnchor`]
#[derive(Clone)]
pub struct AnchorLink {
    anchor: Arc<dyn TrustAnchor>,
    publisher: PublisherIdentity,
    timeout: Duration,
    retry: RetryPolicy,
}

impl fmt::Debug for AnchorLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorLink")
            .field("anchor", &self.anchor.description())
            .field("publisher", &self.publisher.address())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AnchorLink {
    /// Link to `anchor`, publishing as `publisher`; each call is bounded by `timeout`
    pub fn new(anchor: Arc<dyn TrustAnchor>, publisher: PublisherIdentity, timeout: Duration) -> Self {
        Self {
            anchor: Arc::new(TimeoutAnchor::new(anchor, timeout)),
            publisher,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the publish retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn description(&self) -> String {
        self.anchor.description()
    }

    pub fn publisher_address(&self) -> &str {
        self.publisher.address()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn read_state(&self) -> Result<PublishedState> {
        self.anchor.read_state().await
    }

    pub async fn read_thumbprint(&self) -> Result<Option<Thumbprint>> {
        self.anchor.read_thumbprint().await
    }

    pub async fn read_revocation_root(&self) -> Result<MerkleRoot> {
        self.anchor.read_revocation_root().await
    }

    /// Pin `thumbprint` on the anchor
    pub async fn publish_thumbprint(&self, thumbprint: Thumbprint) -> Result<TransactionReceipt> {
        publish_with_retry(self.retry, || {
            self.anchor.publish_thumbprint(thumbprint, &self.publisher)
        })
        .await
    }

    /// Publish `root` as the current revocation root
    pub async fn publish_revocation_root(&self, root: MerkleRoot) -> Result<TransactionReceipt> {
        publish_with_retry(self.retry, || {
            self.anchor.publish_revocation_root(root, &self.publisher)
        })
        .await
    }

    /// Publish the root returned by `current`, re-reading it on every attempt
    ///
    /// A retry after an outage sends the latest root rather than the one
    /// that was current when the first attempt failed.
    pub async fn publish_latest_root<F>(&self, current: F) -> Result<(MerkleRoot, TransactionReceipt)>
    where
        F: Fn() -> MerkleRoot,
    {
        publish_with_retry(self.retry, || {
            let root = current();
            async move {
                let receipt = self.anchor.publish_revocation_root(root, &self.publisher).await?;
                Ok((root, receipt))
            }
        })
        .await
    }
}
