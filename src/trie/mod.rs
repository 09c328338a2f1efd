//! Merkle trie over names.
//!
//! Names are laid out byte-by-byte in a radix tree. Each vertex caches
//! two hashes: the per-name input pulled from the node manager (for
//! vertices that terminate a name) and the subtree hash combining it with
//! the children. Updates mark the affected path dirty; root computation
//! re-hashes dirty paths bottom-up and prunes vertices with nothing left
//! to commit.
//!
//! Two variants share the [`MerkleTrie`] interface: [`ram::RamTrie`]
//! keeps everything in memory and rebuilds from the node manager on
//! startup; [`persistent::PersistentTrie`] additionally stores vertices
//! in a key-value namespace so a restart can skip the rebuild.

pub mod hash;
pub mod persistent;
pub mod ram;

use std::collections::BTreeMap;

use crate::config::Interrupt;
use crate::error::{Error, Result};
use crate::node::manager::HashSource;
use crate::types::MerkleHash;

pub use persistent::PersistentTrie;
pub use ram::RamTrie;

/// Capability set shared by the trie variants.
pub trait MerkleTrie {
    /// Marks the path to `name` dirty. With `require_recompute` the
    /// name's hash input is re-fetched from the source at the next root
    /// computation (creating or removing the leaf as needed); without it
    /// only the cached hashes along an existing path are invalidated.
    fn update(&mut self, name: &[u8], require_recompute: bool);

    /// Recomputes dirty paths under the standard scheme and returns the
    /// root.
    fn merkle_hash(&mut self, source: &mut dyn HashSource) -> Result<MerkleHash>;

    /// Recomputes dirty paths under the all-claims scheme and returns the
    /// root.
    fn merkle_hash_all_claims(&mut self, source: &mut dyn HashSource) -> Result<MerkleHash>;

    /// Adopts `hash` as the authoritative root. With `Some(names)` only
    /// those names are re-marked; with `None` the in-memory tree is
    /// discarded and rebuilt from the source. A no-op when the current
    /// root already equals `hash`.
    fn set_root(
        &mut self,
        hash: &MerkleHash,
        names: Option<&[Vec<u8>]>,
        source: &mut dyn HashSource,
        interrupt: &Interrupt,
    ) -> Result<()>;

    /// Persists dirty vertices (persistent variant only).
    fn flush(&mut self) -> Result<()>;

    /// Releases resources. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// One vertex of the radix tree.
#[derive(Clone, Debug, Default)]
pub(crate) struct Vertex {
    pub(crate) children: BTreeMap<u8, Vertex>,
    /// A name terminates here.
    pub(crate) has_value: bool,
    /// Cached per-name hash input; `None` while dirty.
    pub(crate) claim_hash: Option<MerkleHash>,
    /// Cached subtree hash; `None` while dirty.
    pub(crate) merkle_hash: Option<MerkleHash>,
}

/// Tree structure and hash computation shared by both variants.
#[derive(Default)]
pub(crate) struct Tree {
    pub(crate) root: Vertex,
    /// Which scheme the cached hashes were computed under. `None` until
    /// the first computation, or after adopting a stored tree whose
    /// scheme is unknown (the stored root was verified, so its hashes
    /// are usable either way).
    all_claims_mode: Option<bool>,
}

impl Tree {
    pub(crate) fn new() -> Self {
        Tree::default()
    }

    /// Wraps a vertex loaded from storage.
    pub(crate) fn adopted(root: Vertex) -> Self {
        Tree {
            root,
            all_claims_mode: None,
        }
    }

    /// Marks the path to `name` dirty. `create` also materializes the
    /// path and flags the leaf as carrying a value; without it a missing
    /// path is left untouched.
    pub(crate) fn mark(&mut self, name: &[u8], create: bool) {
        if !create && !Self::contains(&self.root, name) {
            return;
        }
        let mut vertex = &mut self.root;
        vertex.merkle_hash = None;
        for byte in name {
            vertex = vertex.children.entry(*byte).or_default();
            vertex.merkle_hash = None;
        }
        vertex.claim_hash = None;
        if create {
            vertex.has_value = true;
        }
    }

    fn contains(root: &Vertex, name: &[u8]) -> bool {
        let mut vertex = root;
        for byte in name {
            match vertex.children.get(byte) {
                Some(child) => vertex = child,
                None => return false,
            }
        }
        true
    }

    /// Recomputes dirty paths and returns the root, or the canonical
    /// empty root when nothing is committed.
    pub(crate) fn compute(
        &mut self,
        source: &mut dyn HashSource,
        all_claims: bool,
    ) -> Result<MerkleHash> {
        if self.all_claims_mode != Some(all_claims) {
            if self.all_claims_mode.is_some() {
                // Scheme switch: every cached hash was computed under the
                // other scheme.
                Self::clear_hashes(&mut self.root);
            }
            self.all_claims_mode = Some(all_claims);
        }
        let mut path = Vec::new();
        let root = Self::compute_vertex(&mut self.root, &mut path, source, all_claims)?;
        Ok(root.unwrap_or(hash::EMPTY_TRIE_ROOT))
    }

    fn clear_hashes(vertex: &mut Vertex) {
        vertex.merkle_hash = None;
        vertex.claim_hash = None;
        for child in vertex.children.values_mut() {
            Self::clear_hashes(child);
        }
    }

    fn compute_vertex(
        vertex: &mut Vertex,
        path: &mut Vec<u8>,
        source: &mut dyn HashSource,
        all_claims: bool,
    ) -> Result<Option<MerkleHash>> {
        if let Some(h) = vertex.merkle_hash {
            return Ok(Some(h));
        }

        if vertex.has_value && vertex.claim_hash.is_none() {
            match source.node_hash(path)? {
                Some(h) => vertex.claim_hash = Some(h),
                // The name no longer has hashable state; drop the value.
                None => vertex.has_value = false,
            }
        }

        let mut child_hashes: Vec<(u8, MerkleHash)> = Vec::new();
        let keys: Vec<u8> = vertex.children.keys().copied().collect();
        for key in keys {
            path.push(key);
            let child_hash = match vertex.children.get_mut(&key) {
                Some(child) => Self::compute_vertex(child, path, source, all_claims)?,
                None => None,
            };
            path.pop();
            match child_hash {
                Some(h) => child_hashes.push((key, h)),
                None => {
                    vertex.children.remove(&key);
                }
            }
        }

        let own = if vertex.has_value {
            vertex.claim_hash
        } else {
            None
        };

        if child_hashes.is_empty() && own.is_none() {
            vertex.merkle_hash = None;
            return Ok(None);
        }

        let result = if all_claims {
            let children_root = if child_hashes.is_empty() {
                *hash::NO_CHILDREN_HASH
            } else {
                let hashes: Vec<MerkleHash> = child_hashes.iter().map(|(_, h)| *h).collect();
                hash::merkle_root(&hashes)
            };
            let claims = own.unwrap_or(*hash::NO_CLAIMS_HASH);
            hash::hash_merkle_branches(&children_root, &claims)
        } else {
            let mut buf = Vec::with_capacity(child_hashes.len() * 33 + 32);
            for (key, h) in &child_hashes {
                buf.push(*key);
                buf.extend_from_slice(&h.0);
            }
            if let Some(h) = own {
                buf.extend_from_slice(&h.0);
            }
            hash::double_sha256(&buf)
        };

        vertex.merkle_hash = Some(result);
        Ok(Some(result))
    }

    /// Discards the tree and re-marks every name known to the source.
    /// Returns the names marked.
    pub(crate) fn rebuild(
        &mut self,
        source: &dyn HashSource,
        interrupt: &Interrupt,
    ) -> Result<Vec<Vec<u8>>> {
        self.root = Vertex::default();
        let mut interrupted = false;
        let mut names = Vec::new();
        source.iterate_names(&mut |name| {
            if interrupt.is_interrupted() {
                interrupted = true;
                return false;
            }
            names.push(name.to_vec());
            true
        })?;
        if interrupted {
            return Err(Error::Interrupted);
        }
        for name in &names {
            self.mark(name, true);
        }
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use super::HashSource;
    use crate::error::Result;
    use crate::types::MerkleHash;

    /// Map-backed hash source for trie tests.
    #[derive(Default)]
    pub struct MapSource {
        pub hashes: BTreeMap<Vec<u8>, MerkleHash>,
    }

    impl MapSource {
        pub fn with(entries: &[(&[u8], u8)]) -> Self {
            let mut hashes = BTreeMap::new();
            for (name, byte) in entries {
                hashes.insert(name.to_vec(), MerkleHash([*byte; 32]));
            }
            MapSource { hashes }
        }
    }

    impl HashSource for MapSource {
        fn node_hash(&mut self, name: &[u8]) -> Result<Option<MerkleHash>> {
            Ok(self.hashes.get(name).copied())
        }

        fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
            for name in self.hashes.keys() {
                if !f(name) {
                    break;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MapSource;
    use super::*;

    #[test]
    fn empty_tree_commits_the_canonical_empty_root() {
        let mut tree = Tree::new();
        let mut source = MapSource::default();
        let root = tree.compute(&mut source, false).unwrap();
        assert_eq!(root, hash::EMPTY_TRIE_ROOT);
    }

    #[test]
    fn root_changes_when_a_name_is_added() {
        let mut source = MapSource::with(&[(b"a", 1)]);
        let mut tree = Tree::new();
        tree.mark(b"a", true);
        let first = tree.compute(&mut source, false).unwrap();
        assert_ne!(first, hash::EMPTY_TRIE_ROOT);

        source.hashes.insert(b"ab".to_vec(), MerkleHash([2u8; 32]));
        tree.mark(b"ab", true);
        let second = tree.compute(&mut source, false).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn removed_names_prune_back_to_the_empty_root() {
        let mut source = MapSource::with(&[(b"abc", 1)]);
        let mut tree = Tree::new();
        tree.mark(b"abc", true);
        let populated = tree.compute(&mut source, false).unwrap();
        assert_ne!(populated, hash::EMPTY_TRIE_ROOT);

        source.hashes.clear();
        tree.mark(b"abc", true);
        let root = tree.compute(&mut source, false).unwrap();
        assert_eq!(root, hash::EMPTY_TRIE_ROOT);
        assert!(tree.root.children.is_empty());
    }

    #[test]
    fn clean_paths_are_not_refetched() {
        let mut source = MapSource::with(&[(b"a", 1), (b"b", 2)]);
        let mut tree = Tree::new();
        tree.mark(b"a", true);
        tree.mark(b"b", true);
        let first = tree.compute(&mut source, false).unwrap();

        // Mutate the source behind the trie's back; without a mark the
        // cached hashes win.
        source.hashes.insert(b"a".to_vec(), MerkleHash([9u8; 32]));
        let second = tree.compute(&mut source, false).unwrap();
        assert_eq!(first, second);

        tree.mark(b"a", true);
        let third = tree.compute(&mut source, false).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn mark_without_create_ignores_unknown_names() {
        let mut source = MapSource::with(&[(b"a", 1)]);
        let mut tree = Tree::new();
        tree.mark(b"a", true);
        let first = tree.compute(&mut source, false).unwrap();

        tree.mark(b"zzz", false);
        assert!(tree.root.children.get(&b'z').is_none());
        assert_eq!(tree.compute(&mut source, false).unwrap(), first);
    }

    #[test]
    fn scheme_switch_invalidates_cached_hashes() {
        let mut source = MapSource::with(&[(b"a", 1)]);
        let mut tree = Tree::new();
        tree.mark(b"a", true);
        let standard = tree.compute(&mut source, false).unwrap();
        let all_claims = tree.compute(&mut source, true).unwrap();
        assert_ne!(standard, all_claims);

        // Switching back recomputes rather than serving the stale root.
        let standard_again = tree.compute(&mut source, false).unwrap();
        assert_eq!(standard, standard_again);
    }
}
