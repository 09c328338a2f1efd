//! In-memory trie variant.
//!
//! Holds the whole tree in RAM and rebuilds it from the node manager
//! after a restart or a rewind that invalidates everything. The usual
//! choice for validating nodes: startup pays one full replay, every
//! block after that touches only dirty paths.

use crate::config::Interrupt;
use crate::error::Result;
use crate::node::manager::HashSource;
use crate::types::MerkleHash;

use super::{MerkleTrie, Tree};

/// In-memory implementation of [`MerkleTrie`].
#[derive(Default)]
pub struct RamTrie {
    tree: Tree,
    last_root: Option<MerkleHash>,
}

impl RamTrie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        RamTrie::default()
    }
}

impl MerkleTrie for RamTrie {
    fn update(&mut self, name: &[u8], require_recompute: bool) {
        self.tree.mark(name, require_recompute);
        self.last_root = None;
    }

    fn merkle_hash(&mut self, source: &mut dyn HashSource) -> Result<MerkleHash> {
        let root = self.tree.compute(source, false)?;
        self.last_root = Some(root);
        Ok(root)
    }

    fn merkle_hash_all_claims(&mut self, source: &mut dyn HashSource) -> Result<MerkleHash> {
        let root = self.tree.compute(source, true)?;
        self.last_root = Some(root);
        Ok(root)
    }

    fn set_root(
        &mut self,
        hash: &MerkleHash,
        names: Option<&[Vec<u8>]>,
        source: &mut dyn HashSource,
        interrupt: &Interrupt,
    ) -> Result<()> {
        if self.last_root == Some(*hash) {
            return Ok(());
        }
        match names {
            Some(names) => {
                for name in names {
                    self.tree.mark(name, true);
                }
            }
            None => {
                self.tree.rebuild(source, interrupt)?;
            }
        }
        self.last_root = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::hash::EMPTY_TRIE_ROOT;
    use crate::trie::test_support::MapSource;

    #[test]
    fn empty_trie_commits_the_empty_root() {
        let mut trie = RamTrie::new();
        let mut source = MapSource::default();
        assert_eq!(trie.merkle_hash(&mut source).unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn set_root_with_matching_root_is_a_noop() {
        let mut source = MapSource::with(&[(b"a", 1)]);
        let mut trie = RamTrie::new();
        trie.update(b"a", true);
        let root = trie.merkle_hash(&mut source).unwrap();

        let interrupt = Interrupt::default();
        trie.set_root(&root, None, &mut source, &interrupt).unwrap();
        assert_eq!(trie.merkle_hash(&mut source).unwrap(), root);
    }

    #[test]
    fn rebuild_from_source_reproduces_the_root() {
        let mut source = MapSource::with(&[(b"alpha", 1), (b"beta", 2), (b"al", 3)]);
        let mut trie = RamTrie::new();
        for name in [&b"alpha"[..], b"beta", b"al"] {
            trie.update(name, true);
        }
        let root = trie.merkle_hash(&mut source).unwrap();

        let mut fresh = RamTrie::new();
        let interrupt = Interrupt::default();
        fresh
            .set_root(&MerkleHash([7u8; 32]), None, &mut source, &interrupt)
            .unwrap();
        assert_eq!(fresh.merkle_hash(&mut source).unwrap(), root);
    }

    #[test]
    fn interrupted_rebuild_reports_interruption() {
        let mut source = MapSource::with(&[(b"a", 1)]);
        let mut trie = RamTrie::new();

        let interrupt = Interrupt::default();
        interrupt.interrupt();
        let err = trie
            .set_root(&MerkleHash([7u8; 32]), None, &mut source, &interrupt)
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Interrupted));
    }
}
