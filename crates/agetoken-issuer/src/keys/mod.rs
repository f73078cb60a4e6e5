//! Issuer key management

mod registry;

pub use registry::{Jwks, KeyRing, KeyStore, RetiredKey};
