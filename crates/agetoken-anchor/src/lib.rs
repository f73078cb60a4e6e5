//! Trust Anchor
//!
//! Clients for the external bulletin board that verifiers use as their
//! out-of-band root of trust. The board holds two values:
//!
//! - the **thumbprint** of the issuer signing key currently trusted, and
//! - the **revocation root**, a Merkle root over every revoked token hash.
//!
//! The board itself (a ledger contract, a transparency log, a replicated
//! key-value store) is out of scope. This crate only needs to *read the
//! current value* and *submit a signed state transition*.
//!
//! ## Backends
//!
//! - [`MemoryAnchor`]: in-process board with an authorized-publisher list
//! - [`HttpAnchor`]: JSON client for a remote board
//! - [`CachedAnchor`]: optional TTL cache in front of reads
//! - [`TimeoutAnchor`]: bounds every call with a deadline
//!
//! Wrappers compose, e.g. `CachedAnchor(TimeoutAnchor(HttpAnchor))`.
//!
//! ## Usage
//!
//! ```ignore
//! use agetoken_anchor::{MemoryAnchor, PublisherIdentity, TrustAnchor};
//!
//! let publisher = PublisherIdentity::generate();
//! let anchor = MemoryAnchor::new().with_publisher(publisher.address());
//!
//! anchor.publish_thumbprint(keypair.thumbprint(), &publisher).await?;
//! assert_eq!(anchor.read_thumbprint().await?, Some(keypair.thumbprint()));
//! ```

pub mod anchor;
pub mod cached;
pub mod error;
pub mod http;
pub mod identity;
pub mod memory;
pub mod retry;
pub mod timeout;
pub mod types;

pub use anchor::TrustAnchor;
pub use cached::CachedAnchor;
pub use error::{AnchorError, Result};
pub use http::HttpAnchor;
pub use identity::PublisherIdentity;
pub use memory::MemoryAnchor;
pub use retry::{publish_with_retry, RetryPolicy};
pub use timeout::{bounded, TimeoutAnchor, DEFAULT_ANCHOR_TIMEOUT};
pub use types::{PublishedState, StateTransition, StateUpdate, TransactionReceipt};
