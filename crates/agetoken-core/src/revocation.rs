//! Merkle-tree revocation set
//!
//! Revoked tokens are identified by the SHA-256 of their serialized form.
//! The set is summarised by a Merkle root that the issuer publishes to the
//! trust anchor, so verifiers that only hold the root can still check
//! inclusion proofs.
//!
//! Root construction:
//!
//! 1. Sort the revoked hashes (the set is a `BTreeSet`, so it is always sorted;
//!    the root does not depend on the order revocations arrived in).
//! 2. Leaves are `SHA-256(hash)`.
//! 3. While a level has more than one node, hash adjacent pairs
//!    `SHA-256(left || right)`, duplicating the last node of an odd level.
//! 4. The empty set maps to the all-zero sentinel root.
//!
//! The tree is rebuilt on every [`RevocationTree::root`] call. That is fine
//! for moderate revocation counts; very large sets need an incremental tree.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::{digest_from_hex, sha256, sha256_pair, DIGEST_LEN};
use crate::error::{Result, TokenError};

macro_rules! hex_digest_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; DIGEST_LEN]);

        impl $name {
            /// Wrap raw digest bytes
            pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
                Self(bytes)
            }

            /// Parse a 64-character hex string
            pub fn from_hex(value: &str) -> Result<Self> {
                digest_from_hex(value).map(Self).ok_or_else(|| {
                    TokenError::Malformed(format!(
                        "{} must be 64 hex characters",
                        stringify!($name)
                    ))
                })
            }

            /// Raw digest bytes
            pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
                &self.0
            }

            /// Lowercase hex encoding
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_digest_type!(TokenHash, "SHA-256 of a serialized token, the revocation key");
hex_digest_type!(MerkleRoot, "Merkle root over the revoked token hashes");

impl TokenHash {
    /// Hash a serialized token
    pub fn of_token(token: &str) -> Self {
        Self(sha256(token.as_bytes()))
    }

    fn leaf(&self) -> [u8; DIGEST_LEN] {
        sha256(&self.0)
    }
}

impl MerkleRoot {
    /// Root of the empty set
    pub const EMPTY: MerkleRoot = MerkleRoot([0u8; DIGEST_LEN]);

    /// Whether this is the empty-set sentinel
    pub fn is_empty_sentinel(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// Compute the Merkle root of already sorted, de-duplicated hashes
pub fn merkle_root<'a>(sorted: impl IntoIterator<Item = &'a TokenHash>) -> MerkleRoot {
    let mut level: Vec<[u8; DIGEST_LEN]> = sorted.into_iter().map(TokenHash::leaf).collect();
    if level.is_empty() {
        return MerkleRoot::EMPTY;
    }
    while level.len() > 1 {
        level = next_level(&level);
    }
    MerkleRoot(level[0])
}

fn next_level(level: &[[u8; DIGEST_LEN]]) -> Vec<[u8; DIGEST_LEN]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => sha256_pair(left, right),
            [last] => sha256_pair(last, last),
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Which side a sibling sits on when folding a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling node, hex
    #[serde(with = "hex_node")]
    pub sibling: [u8; DIGEST_LEN],
    /// Side of the sibling
    pub side: Side,
}

mod hex_node {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(node: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(node))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::digest::digest_from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("proof node must be 64 hex characters"))
    }
}

/// Inclusion proof for one revoked token hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The revoked hash being proven
    pub token_hash: TokenHash,
    /// Position of the leaf in sorted order
    pub leaf_index: usize,
    /// Number of leaves in the tree the proof was built from
    pub leaf_count: usize,
    /// Sibling path from leaf to root
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Fold the path and compare against `root`
    pub fn verify(&self, root: &MerkleRoot) -> bool {
        let computed = self.path.iter().fold(self.token_hash.leaf(), |node, step| match step.side {
            Side::Left => sha256_pair(&step.sibling, &node),
            Side::Right => sha256_pair(&node, &step.sibling),
        });
        computed == root.0
    }
}

fn build_proof(sorted: &[TokenHash], index: usize) -> MerkleProof {
    let mut level: Vec<[u8; DIGEST_LEN]> = sorted.iter().map(TokenHash::leaf).collect();
    let mut position = index;
    let mut path = Vec::new();

    while level.len() > 1 {
        let step = if position % 2 == 0 {
            // Odd level: the last node is paired with itself
            let sibling = level.get(position + 1).copied().unwrap_or(level[position]);
            ProofStep {
                sibling,
                side: Side::Right,
            }
        } else {
            ProofStep {
                sibling: level[position - 1],
                side: Side::Left,
            }
        };
        path.push(step);
        level = next_level(&level);
        position /= 2;
    }

    MerkleProof {
        token_hash: sorted[index],
        leaf_index: index,
        leaf_count: sorted.len(),
        path,
    }
}

/// Concurrent set of revoked token hashes
///
/// `add` is atomic and `root` always observes a consistent snapshot.
/// Revocation is permanent: there is no removal.
#[derive(Debug, Default)]
pub struct RevocationTree {
    revoked: RwLock<BTreeSet<TokenHash>>,
}

impl RevocationTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree pre-populated with `hashes`
    pub fn from_hashes(hashes: impl IntoIterator<Item = TokenHash>) -> Self {
        Self {
            revoked: RwLock::new(hashes.into_iter().collect()),
        }
    }

    /// Insert a hash. Returns `true` if it was not already revoked.
    pub fn add(&self, hash: TokenHash) -> bool {
        let mut revoked = self.revoked.write().unwrap_or_else(|e| e.into_inner());
        revoked.insert(hash)
    }

    /// Whether `hash` is revoked
    pub fn is_revoked(&self, hash: &TokenHash) -> bool {
        let revoked = self.revoked.read().unwrap_or_else(|e| e.into_inner());
        revoked.contains(hash)
    }

    /// Merkle root over the current set
    pub fn root(&self) -> MerkleRoot {
        let revoked = self.revoked.read().unwrap_or_else(|e| e.into_inner());
        merkle_root(revoked.iter())
    }

    /// Number of revoked hashes
    pub fn len(&self) -> usize {
        self.revoked.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been revoked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inclusion proof for `hash`, if revoked
    pub fn proof(&self, hash: &TokenHash) -> Option<MerkleProof> {
        let sorted: Vec<TokenHash> = {
            let revoked = self.revoked.read().unwrap_or_else(|e| e.into_inner());
            if !revoked.contains(hash) {
                return None;
            }
            revoked.iter().copied().collect()
        };
        let index = sorted.binary_search(hash).ok()?;
        Some(build_proof(&sorted, index))
    }
}
