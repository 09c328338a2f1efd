//! Core domain types used by the claim trie
//!
//! This module defines strongly-typed hashes, outpoints, and claim
//! identifiers that are shared across the trie implementation. The goal is
//! to avoid "naked" byte buffers in public APIs and instead use
//! domain-specific newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Claim and support records plus their lifecycle status.
pub mod claim;

pub use claim::{Claim, ClaimStatus, Support};

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Length in bytes of a claim identifier.
pub const CLAIM_ID_LEN: usize = 20;

/// Maximum length in bytes of a claim name.
///
/// Names are persisted behind a single-byte length prefix, so this bound
/// is load-bearing for the on-disk key layout.
pub const MAX_NAME_LEN: usize = 255;

/// Strongly-typed 256-bit Merkle commitment.
///
/// This type backs every consensus hash in the crate: per-name node
/// hashes, intermediate trie hashes, and the per-block root. It is always
/// exactly [`HASH_LEN`] bytes long.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MerkleHash(pub [u8; HASH_LEN]);

impl MerkleHash {
    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Reconstructs a hash from a raw 32-byte slice.
    ///
    /// Returns `None` if `bytes` is not exactly [`HASH_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(bytes);
        Some(MerkleHash(arr))
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Strongly-typed transaction hash.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default,
)]
pub struct TxId(pub [u8; HASH_LEN]);

impl TxId {
    /// Returns the underlying 32-byte transaction hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Reference to a transaction output: transaction hash plus output index.
///
/// Outpoints order by transaction hash bytes first and output index
/// second; the derived ordering matches the consensus tie-break rule used
/// when two claims bid with equal amounts.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default,
)]
pub struct OutPoint {
    /// Hash of the transaction holding the output.
    pub txid: TxId,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// Creates a new outpoint.
    pub fn new(txid: TxId, index: u32) -> Self {
        OutPoint { txid, index }
    }

    /// Canonical 36-byte serialization: transaction hash followed by the
    /// big-endian output index.
    ///
    /// This encoding is used in persisted change records and in the
    /// post-fork hash scheme, so it must remain stable.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&self.txid.0);
        out[32..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    /// Parses an outpoint from its canonical 36-byte serialization.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 36 {
            return None;
        }
        let mut txid = [0u8; HASH_LEN];
        txid.copy_from_slice(&bytes[..32]);
        let mut idx = [0u8; 4];
        idx.copy_from_slice(&bytes[32..]);
        Some(OutPoint {
            txid: TxId(txid),
            index: u32::from_be_bytes(idx),
        })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Claim identifier: 20 bytes derived from the originating outpoint.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default,
)]
pub struct ClaimId(pub [u8; CLAIM_ID_LEN]);

impl ClaimId {
    /// Derives a claim identifier from the claim's originating outpoint.
    ///
    /// The id is the first [`CLAIM_ID_LEN`] bytes of the double-SHA256 of
    /// the outpoint's canonical serialization. Updates to a claim keep the
    /// id of the original outpoint, which is what lets a claim survive
    /// being moved to a new output.
    pub fn from_outpoint(op: &OutPoint) -> Self {
        let digest = crate::trie::hash::double_sha256(&op.to_bytes());
        let mut id = [0u8; CLAIM_ID_LEN];
        id.copy_from_slice(&digest.0[..CLAIM_ID_LEN]);
        ClaimId(id)
    }

    /// Returns the underlying 20-byte identifier.
    pub fn as_bytes(&self) -> &[u8; CLAIM_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_roundtrips_through_canonical_bytes() {
        let op = OutPoint::new(TxId([7u8; HASH_LEN]), 3);
        let bytes = op.to_bytes();
        assert_eq!(bytes.len(), 36);

        let back = OutPoint::from_bytes(&bytes).expect("36 bytes should parse");
        assert_eq!(back, op);
    }

    #[test]
    fn outpoint_ordering_is_txid_then_index() {
        let a = OutPoint::new(TxId([1u8; HASH_LEN]), 9);
        let b = OutPoint::new(TxId([2u8; HASH_LEN]), 0);
        let c = OutPoint::new(TxId([2u8; HASH_LEN]), 1);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn claim_id_is_deterministic_per_outpoint() {
        let op = OutPoint::new(TxId([5u8; HASH_LEN]), 1);
        let id1 = ClaimId::from_outpoint(&op);
        let id2 = ClaimId::from_outpoint(&op);
        assert_eq!(id1, id2);

        let other = OutPoint::new(TxId([5u8; HASH_LEN]), 2);
        assert_ne!(ClaimId::from_outpoint(&other), id1);
    }

    #[test]
    fn merkle_hash_from_slice_rejects_wrong_length() {
        assert!(MerkleHash::from_slice(&[0u8; 31]).is_none());
        assert!(MerkleHash::from_slice(&[0u8; 32]).is_some());
    }
}
