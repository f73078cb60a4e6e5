//! SHA-256 helpers shared by thumbprints, device bindings and the Merkle tree

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest in bytes
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// SHA-256 of `left || right`
pub fn sha256_pair(left: &[u8], right: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Decode a 64-character hex string into a digest
pub fn digest_from_hex(value: &str) -> Option<[u8; DIGEST_LEN]> {
    let bytes = hex::decode(value.trim()).ok()?;
    bytes.try_into().ok()
}
