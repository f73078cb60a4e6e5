//! Key store for the issuer service
//!
//! Holds the current signing key plus any retired keys still inside their
//! grace window. The set of keys is an immutable [`KeyRing`]; rotation
//! builds a new ring and swaps it in, so readers never see a half-rotated
//! state and never hold the lock while verifying.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use agetoken_core::{IssuerPublicKey, PublicJwk, SigningKeypair, Thumbprint};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A key that has been rotated out
#[derive(Debug, Clone, Copy)]
pub struct RetiredKey {
    pub key: IssuerPublicKey,
    /// Unix seconds at which the key stopped signing
    pub retired_at: i64,
}

/// Immutable snapshot of the issuer keys
#[derive(Debug)]
pub struct KeyRing {
    current: SigningKeypair,
    retired: Vec<RetiredKey>,
}

impl KeyRing {
    /// Key used for all new tokens
    pub fn current(&self) -> &SigningKeypair {
        &self.current
    }

    /// Retired keys, most recent first
    pub fn retired(&self) -> &[RetiredKey] {
        &self.retired
    }
}

/// JSON Web Key Set document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<PublicJwk>,
}

/// Issuer key store
///
/// Built once at startup and shared by `Arc` between the issuer, the
/// verifier and the HTTP handlers.
#[derive(Debug)]
pub struct KeyStore {
    ring: RwLock<Arc<KeyRing>>,
    grace_secs: i64,
}

impl KeyStore {
    /// Create a key store around the loaded signing key
    ///
    /// `grace` is how long a rotated-out key keeps verifying. Zero means a
    /// retired key is rejected immediately.
    pub fn new(current: SigningKeypair, grace: Duration) -> Self {
        info!(
            kid = %current.kid(),
            thumbprint = %current.thumbprint(),
            grace_secs = grace.as_secs(),
            "Key store initialized"
        );
        Self {
            ring: RwLock::new(Arc::new(KeyRing {
                current,
                retired: Vec::new(),
            })),
            grace_secs: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Current key ring
    pub fn snapshot(&self) -> Arc<KeyRing> {
        Arc::clone(&self.ring.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Key used for signing new tokens
    pub fn signing_key(&self) -> SigningKeypair {
        self.snapshot().current.clone()
    }

    /// Thumbprint of the current key
    pub fn current_thumbprint(&self) -> Thumbprint {
        self.snapshot().current.thumbprint()
    }

    /// Key id of the current key
    pub fn current_kid(&self) -> String {
        self.snapshot().current.kid()
    }

    /// Grace window for retired keys
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs as u64)
    }

    fn in_grace(&self, retired: &RetiredKey, now: i64) -> bool {
        now < retired.retired_at.saturating_add(self.grace_secs)
    }

    /// Make `next` the signing key; the previous key enters its grace window
    ///
    /// Retired keys whose window has closed are dropped. Returns the
    /// thumbprint of the key that was replaced. The new thumbprint still has
    /// to be published to the trust anchor.
    pub fn rotate(&self, next: SigningKeypair, now: i64) -> Thumbprint {
        let mut guard = self.ring.write().unwrap_or_else(|e| e.into_inner());
        let previous = guard.current.public_key();

        let mut retired = Vec::with_capacity(guard.retired.len() + 1);
        retired.push(RetiredKey {
            key: previous,
            retired_at: now,
        });
        retired.extend(
            guard
                .retired
                .iter()
                .filter(|r| self.in_grace(r, now))
                .copied(),
        );

        info!(
            old_kid = %previous.kid(),
            new_kid = %next.kid(),
            grace_secs = self.grace_secs,
            "Rotated issuer signing key"
        );

        *guard = Arc::new(KeyRing {
            current: next,
            retired,
        });
        previous.thumbprint()
    }

    /// Whether `thumbprint` belongs to a key this store rotated out
    pub fn is_retired(&self, thumbprint: &Thumbprint) -> bool {
        self.snapshot()
            .retired
            .iter()
            .any(|r| &r.key.thumbprint() == thumbprint)
    }

    /// Public key for `kid` if it is the current key or a retired key in grace
    pub fn key_for_kid(&self, kid: &str, now: i64) -> Option<IssuerPublicKey> {
        let ring = self.snapshot();
        if ring.current.kid() == kid {
            return Some(ring.current.public_key());
        }
        let retired = ring.retired.iter().find(|r| r.key.kid() == kid)?;
        if self.in_grace(retired, now) {
            Some(retired.key)
        } else {
            debug!(kid = %kid, retired_at = retired.retired_at, "Retired key outside grace window");
            None
        }
    }

    /// Public keys that currently verify: the current key first
    pub fn jwks(&self, now: i64) -> Jwks {
        let ring = self.snapshot();
        let keys = std::iter::once(ring.current.public_key().to_jwk())
            .chain(
                ring.retired
                    .iter()
                    .filter(|r| self.in_grace(r, now))
                    .map(|r| r.key.to_jwk()),
            )
            .collect();
        Jwks { keys }
    }
}
