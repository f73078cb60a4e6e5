//! In-process bulletin board
//!
//! Used in tests and single-node deployments where no external ledger is
//! configured. It enforces the same rules a real board would: signatures,
//! an authorized-publisher list and replay protection.
//!
//! Replay protection only remembers nonces inside the freshness window.
//! Transitions signed outside that window are rejected outright, so a
//! forgotten nonce can never be replayed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::anchor::TrustAnchor;
use crate::error::{AnchorError, Result};
use crate::types::{PublishedState, StateTransition, StateUpdate, TransactionReceipt};

/// How far `signed_at` may lag behind the board's clock
pub const TRANSITION_FRESHNESS: Duration = Duration::from_secs(300);

/// How far `signed_at` may run ahead of the board's clock
pub const TRANSITION_CLOCK_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Board {
    state: PublishedState,
    authorized: HashSet<String>,
    /// Nonce to `signed_at`, pruned once older than the freshness window
    seen_nonces: HashMap<String, DateTime<Utc>>,
}

impl Board {
    fn prune_nonces(&mut self, oldest: DateTime<Utc>) {
        self.seen_nonces.retain(|_, signed_at| *signed_at >= oldest);
    }
}

/// Bulletin board held in memory
#[derive(Debug)]
pub struct MemoryAnchor {
    board: Mutex<Board>,
    available: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryAnchor {
    /// Create an empty board with no authorized publishers
    pub fn new() -> Self {
        Self {
            board: Mutex::new(Board::default()),
            available: AtomicBool::new(true),
            latency: Mutex::new(None),
        }
    }

    /// Authorize a publisher address (builder form)
    pub fn with_publisher(self, address: impl Into<String>) -> Self {
        self.authorize(address);
        self
    }

    /// Authorize a publisher address
    pub fn authorize(&self, address: impl Into<String>) {
        let address = address.into();
        debug!(publisher = %address, "Authorized anchor publisher");
        self.lock().authorized.insert(address);
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`AnchorError::Unreachable`]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Validate and apply a transition synchronously
    ///
    /// Exposed so an HTTP board can be served from the same rules.
    pub fn apply(&self, transition: StateTransition) -> Result<TransactionReceipt> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AnchorError::Unreachable("memory anchor offline".into()));
        }

        transition.verify_signature()?;

        let mut board = self.lock();
        if !board.authorized.contains(&transition.publisher) {
            warn!(
                publisher = %transition.publisher,
                kind = transition.update.kind(),
                "SECURITY: Unauthorized anchor publish attempt"
            );
            return Err(AnchorError::PublishRejected(format!(
                "publisher {} is not authorized",
                transition.publisher
            )));
        }

        let now = Utc::now();
        let oldest = now - chrono::Duration::seconds(TRANSITION_FRESHNESS.as_secs() as i64);
        let newest = now + chrono::Duration::seconds(TRANSITION_CLOCK_SKEW.as_secs() as i64);
        if transition.signed_at < oldest || transition.signed_at > newest {
            warn!(
                publisher = %transition.publisher,
                signed_at = %transition.signed_at,
                "SECURITY: Anchor transition outside freshness window"
            );
            return Err(AnchorError::PublishRejected("transition is not fresh".into()));
        }

        board.prune_nonces(oldest);
        if board.seen_nonces.contains_key(&transition.nonce) {
            warn!(
                publisher = %transition.publisher,
                nonce = %transition.nonce,
                "SECURITY: Replayed anchor transition"
            );
            return Err(AnchorError::PublishRejected("transition nonce already used".into()));
        }
        board.seen_nonces.insert(transition.nonce.clone(), transition.signed_at);

        match transition.update {
            StateUpdate::Thumbprint(thumbprint) => board.state.thumbprint = Some(thumbprint),
            StateUpdate::RevocationRoot(root) => board.state.revocation_root = root,
        }
        if board.state.issuer_address.is_none() {
            board.state.issuer_address = Some(transition.publisher.clone());
        }
        board.state.sequence += 1;

        Ok(TransactionReceipt {
            tx_id: format!("0x{}", uuid::Uuid::new_v4().simple()),
            sequence: board.state.sequence,
            accepted_at: Utc::now(),
        })
    }

    /// Current state without availability or latency simulation
    pub fn snapshot(&self) -> PublishedState {
        self.lock().state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryAnchor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustAnchor for MemoryAnchor {
    async fn read_state(&self) -> Result<PublishedState> {
        self.simulate_latency().await;
        if !self.available.load(Ordering::SeqCst) {
            return Err(AnchorError::Unreachable("memory anchor offline".into()));
        }
        Ok(self.snapshot())
    }

    async fn submit(&self, transition: StateTransition) -> Result<TransactionReceipt> {
        self.simulate_latency().await;
        self.apply(transition)
    }

    fn description(&self) -> String {
        "in-memory bulletin board".to_string()
    }
}
