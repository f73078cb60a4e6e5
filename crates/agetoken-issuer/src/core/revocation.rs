//! Revocation service
//!
//! Ties the in-memory [`RevocationTree`] to durable storage and to the trust
//! anchor. A revocation is committed locally (store, then tree) before the
//! new root is published; a failed publish never undoes it. The periodic
//! root sync republishes whatever the anchor is missing.
//!
//! Root publication is serialized, and each attempt sends the tree's root
//! at that moment. The tree only grows, so the anchored root never moves
//! back to an older set.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use agetoken_anchor::{AnchorError, TransactionReceipt};
use agetoken_core::{DeviceBinding, MerkleProof, MerkleRoot, RevocationTree, TokenHash};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::anchor_link::AnchorLink;
use crate::storage::{DeviceRevocation, RevocationRecord, RevocationStore, StorageError};

/// Result of [`RevocationService::revoke`]
#[derive(Debug)]
pub struct RevokeOutcome {
    pub token_hash: TokenHash,
    /// `false` if the hash was already revoked
    pub newly_revoked: bool,
    /// Root published for this revocation, or the local root if publishing
    /// failed or was not needed
    pub root: MerkleRoot,
    /// Anchor receipt, if the root was published
    pub receipt: Option<TransactionReceipt>,
    /// Why publishing failed; the revocation itself still holds
    pub publish_error: Option<AnchorError>,
    pub total_revoked: usize,
}

impl RevokeOutcome {
    pub fn published(&self) -> bool {
        self.receipt.is_some()
    }
}

/// Result of [`RevocationService::sync_root`]
#[derive(Debug)]
pub enum RootSync {
    /// The anchor already holds the local root
    InSync(MerkleRoot),
    /// The local root was published
    Republished {
        anchored: MerkleRoot,
        local: MerkleRoot,
        receipt: TransactionReceipt,
    },
}

/// Revoked token hashes and devices, kept in step with storage and anchor
#[derive(Debug)]
pub struct RevocationService {
    tree: RevocationTree,
    devices: RwLock<HashSet<DeviceBinding>>,
    store: Arc<dyn RevocationStore>,
    anchor: AnchorLink,
    publish_lock: Mutex<()>,
}

impl RevocationService {
    /// Rebuild the tree and device set from `store`
    pub async fn load(store: Arc<dyn RevocationStore>, anchor: AnchorLink) -> Result<Self, StorageError> {
        let revocations = store.list_revocations().await?;
        let devices = store.list_device_revocations().await?;

        let tree = RevocationTree::from_hashes(revocations.iter().map(|r| r.token_hash));
        let devices: HashSet<DeviceBinding> = devices.into_iter().map(|d| d.device_id).collect();

        info!(
            revoked_tokens = tree.len(),
            revoked_devices = devices.len(),
            root = %tree.root(),
            "Revocation state loaded"
        );

        Ok(Self {
            tree,
            devices: RwLock::new(devices),
            store,
            anchor,
            publish_lock: Mutex::new(()),
        })
    }

    /// Revoke a token by hash and publish the new root
    ///
    /// Storage errors fail the call before anything changes. Anchor errors
    /// are reported in the outcome.
    pub async fn revoke(&self, token_hash: TokenHash, reason: &str) -> Result<RevokeOutcome, StorageError> {
        let record = RevocationRecord {
            token_hash,
            revoked_at: Utc::now(),
            reason: reason.to_string(),
        };
        let stored = self.store.revoke(record).await?;
        let added = self.tree.add(token_hash);
        let newly_revoked = stored || added;

        let (root, receipt, publish_error) = if newly_revoked {
            match self.publish_current_root().await {
                Ok((root, receipt)) => (root, Some(receipt), None),
                Err(e) => {
                    let root = self.tree.root();
                    error!(
                        token_hash = %token_hash,
                        root = %root,
                        error = %e,
                        "Revocation committed locally but root publish failed"
                    );
                    (root, None, Some(e))
                }
            }
        } else {
            (self.tree.root(), None, None)
        };

        Ok(RevokeOutcome {
            token_hash,
            newly_revoked,
            root,
            receipt,
            publish_error,
            total_revoked: self.tree.len(),
        })
    }

    /// Revoke every token bound to `device_id`. Returns `false` if the
    /// device was already revoked.
    pub async fn revoke_device(&self, device_id: DeviceBinding, reason: &str) -> Result<bool, StorageError> {
        let record = DeviceRevocation {
            device_id: device_id.clone(),
            revoked_at: Utc::now(),
            reason: reason.to_string(),
        };
        let stored = self.store.revoke_device(record).await?;
        let added = self
            .devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.clone());
        if stored || added {
            warn!(device_id = %device_id, reason = %reason, "Device revoked");
        }
        Ok(stored || added)
    }

    pub fn is_revoked(&self, token_hash: &TokenHash) -> bool {
        self.tree.is_revoked(token_hash)
    }

    pub fn is_device_revoked(&self, device_id: &DeviceBinding) -> bool {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(device_id)
    }

    /// Stored record for a revoked hash
    pub async fn get_revocation(&self, token_hash: &TokenHash) -> Result<Option<RevocationRecord>, StorageError> {
        self.store.get_revocation(token_hash).await
    }

    pub fn root(&self) -> MerkleRoot {
        self.tree.root()
    }

    pub fn proof(&self, token_hash: &TokenHash) -> Option<MerkleProof> {
        self.tree.proof(token_hash)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Root currently published on the anchor
    pub async fn anchored_root(&self) -> Result<MerkleRoot, AnchorError> {
        self.anchor.read_revocation_root().await
    }

    /// Publish the tree's current root; callers queue behind one another
    async fn publish_current_root(&self) -> Result<(MerkleRoot, TransactionReceipt), AnchorError> {
        let _guard = self.publish_lock.lock().await;
        self.anchor.publish_latest_root(|| self.tree.root()).await
    }

    /// Publish the local root if the anchor holds a different one
    pub async fn sync_root(&self) -> Result<RootSync, AnchorError> {
        let _guard = self.publish_lock.lock().await;
        let anchored = self.anchor.read_revocation_root().await?;
        let local = self.tree.root();
        if anchored == local {
            return Ok(RootSync::InSync(local));
        }

        warn!(anchored = %anchored, local = %local, "Anchored revocation root is stale, republishing");
        let (local, receipt) = self.anchor.publish_latest_root(|| self.tree.root()).await?;
        Ok(RootSync::Republished {
            anchored,
            local,
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use agetoken_anchor::{MemoryAnchor, PublisherIdentity, RetryPolicy};
    use std::time::Duration;

    async fn service(board: Arc<MemoryAnchor>, store: Arc<dyn RevocationStore>) -> RevocationService {
        let publisher = PublisherIdentity::generate();
        board.authorize(publisher.address());
        let link = AnchorLink::new(board, publisher, Duration::from_secs(1)).with_retry(RetryPolicy::none());
        RevocationService::load(store, link).await.unwrap()
    }

    #[tokio::test]
    async fn test_revoke_publishes_root() {
        let board = Arc::new(MemoryAnchor::new());
        let svc = service(Arc::clone(&board), Arc::new(MemoryStore::new())).await;
        let hash = TokenHash::of_token("t1");

        let outcome = svc.revoke(hash, "stolen").await.unwrap();

        assert!(outcome.newly_revoked);
        assert!(outcome.published());
        assert_eq!(outcome.total_revoked, 1);
        assert!(svc.is_revoked(&hash));
        assert_eq!(board.snapshot().revocation_root, outcome.root);
    }

    #[tokio::test]
    async fn test_repeat_revoke_does_not_republish() {
        let board = Arc::new(MemoryAnchor::new());
        let svc = service(Arc::clone(&board), Arc::new(MemoryStore::new())).await;
        let hash = TokenHash::of_token("t1");

        svc.revoke(hash, "first").await.unwrap();
        let again = svc.revoke(hash, "second").await.unwrap();

        assert!(!again.newly_revoked);
        assert!(!again.published());
        assert_eq!(board.snapshot().sequence, 1);
    }

    #[tokio::test]
    async fn test_revocation_survives_anchor_outage() {
        let board = Arc::new(MemoryAnchor::new());
        let svc = service(Arc::clone(&board), Arc::new(MemoryStore::new())).await;
        board.set_available(false);

        let outcome = svc.revoke(TokenHash::of_token("t1"), "stolen").await.unwrap();
        assert!(outcome.newly_revoked);
        assert!(matches!(outcome.publish_error, Some(AnchorError::Unreachable(_))));
        assert!(svc.is_revoked(&TokenHash::of_token("t1")));

        board.set_available(true);
        match svc.sync_root().await.unwrap() {
            RootSync::Republished { anchored, local, .. } => {
                assert_eq!(anchored, MerkleRoot::EMPTY);
                assert_eq!(local, svc.root());
            }
            other => panic!("expected republish, got {:?}", other),
        }
        assert!(matches!(svc.sync_root().await.unwrap(), RootSync::InSync(_)));
    }

    #[tokio::test]
    async fn test_state_rebuilt_from_store() {
        let store: Arc<dyn RevocationStore> = Arc::new(MemoryStore::new());
        let board = Arc::new(MemoryAnchor::new());
        let device = DeviceBinding::from_device_public_key(b"device");
        let root = {
            let svc = service(Arc::clone(&board), Arc::clone(&store)).await;
            svc.revoke(TokenHash::of_token("a"), "x").await.unwrap();
            svc.revoke(TokenHash::of_token("b"), "y").await.unwrap();
            svc.revoke_device(device.clone(), "lost").await.unwrap();
            svc.root()
        };

        let svc = service(board, store).await;
        assert_eq!(svc.len(), 2);
        assert_eq!(svc.root(), root);
        assert!(svc.is_device_revoked(&device));
        assert!(svc.proof(&TokenHash::of_token("a")).unwrap().verify(&root));
    }

    #[tokio::test]
    async fn test_revoke_device_idempotent() {
        let svc = service(Arc::new(MemoryAnchor::new()), Arc::new(MemoryStore::new())).await;
        let device = DeviceBinding::from_device_public_key(b"device");

        assert!(svc.revoke_device(device.clone(), "lost").await.unwrap());
        assert!(!svc.revoke_device(device.clone(), "lost again").await.unwrap());
        assert!(svc.is_device_revoked(&device));
    }

    #[tokio::test]
    async fn test_retried_publish_never_leaves_stale_root() {
        let board = Arc::new(MemoryAnchor::new());
        let publisher = PublisherIdentity::generate();
        board.authorize(publisher.address());
        let retry = RetryPolicy {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };
        let link = AnchorLink::new(Arc::clone(&board) as Arc<dyn agetoken_anchor::TrustAnchor>, publisher, Duration::from_secs(1))
            .with_retry(retry);
        let svc = Arc::new(RevocationService::load(Arc::new(MemoryStore::new()), link).await.unwrap());

        // First revocation starts during an outage and keeps retrying
        board.set_available(false);
        let first = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.revoke(TokenHash::of_token("A"), "stolen").await.unwrap() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        board.set_available(true);

        let second = svc.revoke(TokenHash::of_token("B"), "stolen").await.unwrap();
        let first = first.await.unwrap();

        assert!(first.published());
        assert!(second.published());
        assert_eq!(second.root, svc.root());
        assert_eq!(board.snapshot().revocation_root, svc.root());
        assert!(matches!(svc.sync_root().await.unwrap(), RootSync::InSync(_)));
    }
}
