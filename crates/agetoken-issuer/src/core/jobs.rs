//! Background anchor jobs
//!
//! Both jobs stop when the shutdown channel flips to `true` (or its sender
//! is dropped). Stopping mid-publish leaves local state untouched; the next
//! run republishes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agetoken_anchor::{AnchorError, TransactionReceipt};
use agetoken_core::{KeyLoadError, SigningKeypair, Thumbprint};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::anchor_link::AnchorLink;
use super::revocation::{RevocationService, RootSync};
use crate::keys::KeyStore;

/// Outcome of [`ensure_thumbprint`]
#[derive(Debug)]
pub enum ThumbprintSync {
    /// The anchor already pins the current key
    AlreadyPinned,
    /// The current key was published
    Published(TransactionReceipt),
    /// The anchor pins another key; left for an operator to resolve
    Conflict,
}

/// Publish the current thumbprint if the anchor pins no key yet
///
/// A pin of a key this process rotated out is moved to the current key.
/// Any other pinned key is never overwritten here: it is either another
/// deployment's key or a compromise, and both need an operator.
pub async fn ensure_thumbprint(keys: &KeyStore, anchor: &AnchorLink) -> Result<ThumbprintSync, AnchorError> {
    let current = keys.current_thumbprint();
    match anchor.read_thumbprint().await? {
        Some(pinned) if pinned == current => {
            info!(thumbprint = %current, "Trust anchor already pins issuer key");
            Ok(ThumbprintSync::AlreadyPinned)
        }
        Some(pinned) if keys.is_retired(&pinned) => {
            info!(previous = %pinned, current = %current, "Moving trust anchor pin to rotated key");
            let receipt = anchor.publish_thumbprint(current).await?;
            Ok(ThumbprintSync::Published(receipt))
        }
        Some(pinned) => {
            error!(
                pinned = %pinned,
                current = %current,
                "ALERT: trust anchor pins a different issuer key; not overwriting"
            );
            Ok(ThumbprintSync::Conflict)
        }
        None => {
            let receipt = anchor.publish_thumbprint(current).await?;
            Ok(ThumbprintSync::Published(receipt))
        }
    }
}

/// Errors from [`rotate_signing_key`]
#[derive(Debug, Error)]
pub enum RotationError {
    /// The anchor pins a key this process does not hold
    #[error("trust anchor pins foreign key {0}")]
    ForeignPin(Thumbprint),

    #[error(transparent)]
    Anchor(#[from] AnchorError),

    #[error(transparent)]
    KeyFile(#[from] KeyLoadError),
}

/// Outcome of [`rotate_signing_key`]
#[derive(Debug)]
pub struct KeyRotation {
    pub previous: Thumbprint,
    pub current: Thumbprint,
    /// Pinning result; on failure the rotation still holds and a later
    /// thumbprint publish completes it
    pub publish: Result<ThumbprintSync, AnchorError>,
}

/// Replace the signing key and pin the new one on the anchor
///
/// Refuses to rotate while the anchor pins a foreign key. The new key is
/// written to `key_file` before it signs anything.
pub async fn rotate_signing_key(
    keys: &KeyStore,
    anchor: &AnchorLink,
    key_file: Option<&Path>,
    now: i64,
) -> Result<KeyRotation, RotationError> {
    let current = keys.current_thumbprint();
    if let Some(pinned) = anchor.read_thumbprint().await? {
        if pinned != current && !keys.is_retired(&pinned) {
            error!(pinned = %pinned, current = %current, "ALERT: refusing key rotation, anchor pins a foreign key");
            return Err(RotationError::ForeignPin(pinned));
        }
    }

    let next = SigningKeypair::generate();
    if let Some(path) = key_file {
        agetoken_core::keys::persist(&next, path)?;
    }
    let previous = keys.rotate(next, now);
    let current = keys.current_thumbprint();

    let publish = ensure_thumbprint(keys, anchor).await;
    if let Err(e) = &publish {
        warn!(current = %current, error = %e, "Key rotated but new thumbprint not yet pinned");
    }
    Ok(KeyRotation {
        previous,
        current,
        publish,
    })
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Push the thumbprint once at startup
pub fn spawn_thumbprint_publish(
    keys: Arc<KeyStore>,
    anchor: AnchorLink,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = ensure_thumbprint(&keys, &anchor) => match result {
                Ok(sync) => debug!(outcome = ?sync, "Startup thumbprint check complete"),
                Err(e) => error!(error = %e, "Failed to publish issuer thumbprint at startup"),
            },
            _ = shutdown.changed() => info!("Startup thumbprint publish cancelled"),
        }
    })
}

/// Periodically republish the revocation root if the anchor is behind
///
/// Returns `None` when `interval` is zero.
pub fn spawn_root_sync(
    revocations: Arc<RevocationService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Revocation root sync disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || stopping(&shutdown) {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                result = revocations.sync_root() => match result {
                    Ok(RootSync::InSync(root)) => debug!(root = %root, "Revocation root in sync"),
                    Ok(RootSync::Republished { local, receipt, .. }) => {
                        info!(root = %local, tx_id = %receipt.tx_id, "Republished revocation root")
                    }
                    Err(e) => warn!(error = %e, "Revocation root sync failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Revocation root sync stopped");
    }))
}
