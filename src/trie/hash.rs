//! Consensus hash functions.
//!
//! Every commitment in the trie is a double-SHA256. Two per-name schemes
//! exist: the standard one commits to the controlling claim only, the
//! post-fork one commits to every active claim and its supports. Both
//! must be reproducible bit-for-bit, so the byte encodings here are
//! consensus-fixed.

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::node::Node;
use crate::types::{Claim, MerkleHash, OutPoint};

/// Root committed by a trie with no hashable names.
pub const EMPTY_TRIE_ROOT: MerkleHash = MerkleHash([
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

/// Sentinel standing in for an absent child set in the all-claims scheme.
pub static NO_CHILDREN_HASH: Lazy<MerkleHash> = Lazy::new(|| double_sha256(&[]));

/// Sentinel standing in for an absent claim set in the all-claims scheme.
pub static NO_CLAIMS_HASH: Lazy<MerkleHash> = Lazy::new(|| double_sha256(&[]));

/// SHA-256 applied twice.
pub fn double_sha256(data: &[u8]) -> MerkleHash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    MerkleHash(out)
}

/// Combines two branch hashes: `dsha(left ++ right)`.
pub fn hash_merkle_branches(left: &MerkleHash, right: &MerkleHash) -> MerkleHash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left.0);
    buf[32..].copy_from_slice(&right.0);
    double_sha256(&buf)
}

/// Merkle root over an ordered list of hashes: pair adjacent entries,
/// duplicating the last on odd counts, until one remains.
///
/// Returns the all-zero hash for an empty list so callers do not have to
/// special-case it.
pub fn merkle_root(hashes: &[MerkleHash]) -> MerkleHash {
    if hashes.is_empty() {
        return MerkleHash([0u8; 32]);
    }
    let mut level: Vec<MerkleHash> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(hash_merkle_branches(&pair[0], right));
        }
        level = next;
    }
    level[0]
}

/// Standard (pre-fork) per-name hash: commits to the controlling claim's
/// outpoint and the takeover height.
///
/// The output index and the height enter as ASCII decimal strings; the
/// encoding is consensus-fixed and cannot be modernized.
pub fn standard_node_hash(outpoint: &OutPoint, takeover_height: i32) -> MerkleHash {
    let txid_hash = double_sha256(outpoint.txid.as_bytes());
    let index_hash = double_sha256(outpoint.index.to_string().as_bytes());
    let takeover_hash = double_sha256(takeover_height.to_string().as_bytes());

    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(&txid_hash.0);
    buf.extend_from_slice(&index_hash.0);
    buf.extend_from_slice(&takeover_hash.0);
    double_sha256(&buf)
}

/// All-claims (post-fork) per-name hash: merkle root over every active
/// claim in bid order, each committing to its outpoint, the takeover
/// height, and its active supports.
///
/// Returns `None` when the name has no active claim.
pub fn all_claims_node_hash(node: &Node) -> Option<MerkleHash> {
    let mut active: Vec<&Claim> = node
        .claims()
        .iter()
        .filter(|c| c.status == crate::types::ClaimStatus::Activated)
        .collect();
    if active.is_empty() {
        return None;
    }

    // Bid order: greatest effective amount, earlier acceptance, smaller
    // outpoint.
    active.sort_by(|a, b| {
        node.effective_amount_of(b)
            .cmp(&node.effective_amount_of(a))
            .then(a.accepted_height.cmp(&b.accepted_height))
            .then(a.outpoint.cmp(&b.outpoint))
    });

    let takeover = (node.takeover_height() as u32).to_be_bytes();
    let entries: Vec<MerkleHash> = active
        .iter()
        .map(|claim| {
            let supports_root = supports_hash(node, claim);
            let mut buf = Vec::with_capacity(96);
            buf.extend_from_slice(&double_sha256(&claim.outpoint.to_bytes()).0);
            buf.extend_from_slice(&double_sha256(&takeover).0);
            buf.extend_from_slice(&double_sha256(&supports_root.0).0);
            double_sha256(&buf)
        })
        .collect();

    Some(merkle_root(&entries))
}

/// Merkle root over `(outpoint, amount)` of the claim's active supports,
/// ordered by outpoint. All-zero when the claim has none.
fn supports_hash(node: &Node, claim: &Claim) -> MerkleHash {
    let mut supports = node.active_supports_of(&claim.claim_id);
    supports.sort_by(|a, b| a.outpoint.cmp(&b.outpoint));

    let entries: Vec<MerkleHash> = supports
        .iter()
        .map(|s| {
            let mut buf = Vec::with_capacity(44);
            buf.extend_from_slice(&s.outpoint.to_bytes());
            buf.extend_from_slice(&s.amount.to_be_bytes());
            double_sha256(&buf)
        })
        .collect();

    merkle_root(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;

    #[test]
    fn double_sha256_matches_known_vector() {
        // dsha("hello") is a fixed, externally checkable value.
        let digest = double_sha256(b"hello");
        assert_eq!(
            hex::encode(digest.0),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn merkle_root_of_single_hash_is_the_hash() {
        let h = double_sha256(b"x");
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn merkle_root_duplicates_odd_tail() {
        let a = double_sha256(b"a");
        let b = double_sha256(b"b");
        let c = double_sha256(b"c");

        let root = merkle_root(&[a, b, c]);
        let expected = hash_merkle_branches(
            &hash_merkle_branches(&a, &b),
            &hash_merkle_branches(&c, &c),
        );
        assert_eq!(root, expected);
    }

    #[test]
    fn standard_node_hash_depends_on_every_input() {
        let op = OutPoint::new(TxId([1u8; 32]), 0);
        let base = standard_node_hash(&op, 5);

        assert_ne!(standard_node_hash(&op, 6), base);
        let other = OutPoint::new(TxId([1u8; 32]), 1);
        assert_ne!(standard_node_hash(&other, 5), base);
    }
}
