//! Core logic for the issuer service

mod anchor_link;
mod generation;
mod issuer;
pub mod jobs;
mod legacy;
mod rejection;
mod revocation;
mod verifier;

pub use anchor_link::AnchorLink;
pub use generation::GenerationCounter;
pub use issuer::{IssuancePolicy, IssueError, Issuer, MintedToken};
pub use legacy::LegacyToken;
pub use rejection::{ErrorKind, Rejection, RevocationCause};
pub use revocation::{RevocationService, RevokeOutcome, RootSync};
pub use verifier::{
    AnchorFailurePolicy, TokenFormat, TrustStatus, VerifiedToken, Verifier, VerifierPolicy,
};
