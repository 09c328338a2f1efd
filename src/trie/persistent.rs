//! Persistent trie variant.
//!
//! Same tree as [`super::ram::RamTrie`], plus a key-value namespace
//! holding one record per vertex under its byte-prefix key:
//!
//! ```text
//! key   = name prefix (root = empty key)
//! value = child-bitmap:32 ++ flags:u8 ++ claim_hash? ++ merkle_hash?
//! ```
//!
//! `flush` writes the vertices along every path touched since the last
//! flush; a restart whose stored root matches the expected one skips the
//! full rebuild the RAM variant pays.

use std::collections::BTreeSet;

use crate::config::Interrupt;
use crate::error::Result;
use crate::node::manager::HashSource;
use crate::store::{Batch, KvStore, StorageError};
use crate::types::MerkleHash;

use super::{MerkleTrie, Tree, Vertex};

/// Flag bits in a persisted vertex record.
const FLAG_HAS_VALUE: u8 = 0b001;
const FLAG_CLAIM_HASH: u8 = 0b010;
const FLAG_MERKLE_HASH: u8 = 0b100;

/// KV-backed implementation of [`MerkleTrie`].
pub struct PersistentTrie {
    tree: Tree,
    kv: Box<dyn KvStore>,
    /// Names whose paths changed since the last flush.
    dirty: BTreeSet<Vec<u8>>,
    last_root: Option<MerkleHash>,
}

impl PersistentTrie {
    /// Creates a trie over the given store namespace. The tree starts
    /// empty; call [`MerkleTrie::set_root`] to load persisted state.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        PersistentTrie {
            tree: Tree::new(),
            kv,
            dirty: BTreeSet::new(),
            last_root: None,
        }
    }

    fn encode_vertex(vertex: &Vertex) -> Vec<u8> {
        let mut bitmap = [0u8; 32];
        for byte in vertex.children.keys() {
            bitmap[(*byte / 8) as usize] |= 1 << (byte % 8);
        }

        let mut flags = 0u8;
        if vertex.has_value {
            flags |= FLAG_HAS_VALUE;
        }
        if vertex.claim_hash.is_some() {
            flags |= FLAG_CLAIM_HASH;
        }
        if vertex.merkle_hash.is_some() {
            flags |= FLAG_MERKLE_HASH;
        }

        let mut out = Vec::with_capacity(32 + 1 + 64);
        out.extend_from_slice(&bitmap);
        out.push(flags);
        if let Some(h) = vertex.claim_hash {
            out.extend_from_slice(&h.0);
        }
        if let Some(h) = vertex.merkle_hash {
            out.extend_from_slice(&h.0);
        }
        out
    }

    /// Decodes a record into a childless vertex plus the list of child
    /// bytes to load.
    fn decode_vertex(value: &[u8]) -> std::result::Result<(Vertex, Vec<u8>), StorageError> {
        if value.len() < 33 {
            return Err(StorageError::Corrupted("trie vertex length"));
        }
        let flags = value[32];
        let mut offset = 33;

        let mut take_hash = |wanted: bool| -> std::result::Result<Option<MerkleHash>, StorageError> {
            if !wanted {
                return Ok(None);
            }
            let end = offset + 32;
            if value.len() < end {
                return Err(StorageError::Corrupted("trie vertex hash"));
            }
            let h = MerkleHash::from_slice(&value[offset..end])
                .ok_or(StorageError::Corrupted("trie vertex hash"))?;
            offset = end;
            Ok(Some(h))
        };

        let claim_hash = take_hash(flags & FLAG_CLAIM_HASH != 0)?;
        let merkle_hash = take_hash(flags & FLAG_MERKLE_HASH != 0)?;

        let mut child_bytes = Vec::new();
        for byte in 0..=255u8 {
            if value[(byte / 8) as usize] & (1 << (byte % 8)) != 0 {
                child_bytes.push(byte);
            }
        }

        let vertex = Vertex {
            children: Default::default(),
            has_value: flags & FLAG_HAS_VALUE != 0,
            claim_hash,
            merkle_hash,
        };
        Ok((vertex, child_bytes))
    }

    /// Loads the subtree rooted at `prefix`. Returns `None` when the
    /// vertex record is missing.
    fn load_subtree(&self, prefix: &mut Vec<u8>) -> Result<Option<Vertex>> {
        let Some(value) = self.kv.get(prefix)? else {
            return Ok(None);
        };
        let (mut vertex, child_bytes) = Self::decode_vertex(&value)?;
        for byte in child_bytes {
            prefix.push(byte);
            let child = self.load_subtree(prefix)?;
            prefix.pop();
            match child {
                Some(child) => {
                    vertex.children.insert(byte, child);
                }
                // Half-written trees lose their cached hashes and fall
                // back to a source rebuild at the root check.
                None => return Ok(None),
            }
        }
        Ok(Some(vertex))
    }

    /// Persists (or deletes) the vertices along `name`'s path.
    fn persist_path(&self, name: &[u8], batch: &mut Batch) {
        for end in 0..=name.len() {
            let prefix = &name[..end];
            match Self::vertex_at(&self.tree.root, prefix) {
                Some(vertex) => batch.put(prefix.to_vec(), Self::encode_vertex(vertex)),
                None => batch.delete(prefix.to_vec()),
            }
        }
    }

    fn vertex_at<'a>(root: &'a Vertex, prefix: &[u8]) -> Option<&'a Vertex> {
        let mut vertex = root;
        for byte in prefix {
            vertex = vertex.children.get(byte)?;
        }
        Some(vertex)
    }
}

impl MerkleTrie for PersistentTrie {
    fn update(&mut self, name: &[u8], require_recompute: bool) {
        self.tree.mark(name, require_recompute);
        self.dirty.insert(name.to_vec());
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
                    self.dirty.insert(name.clone());
                }
            }
            None => {
                // Prefer the stored tree when it matches the expected
                // root; otherwise (fresh database, or a rewind across the
                // hash fork left the stored hashes under the wrong
                // scheme) rebuild from the source.
                let loaded = self.load_subtree(&mut Vec::new())?;
                match loaded {
                    Some(root) if root.merkle_hash == Some(*hash) => {
                        self.tree = Tree::adopted(root);
                        self.last_root = Some(*hash);
                        return Ok(());
                    }
                    _ => {
                        let names = self.tree.rebuild(source, interrupt)?;
                        self.dirty.extend(names);
                    }
                }
            }
        }
        self.last_root = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut batch = Batch::new();
        batch.put(Vec::new(), Self::encode_vertex(&self.tree.root));
        for name in std::mem::take(&mut self.dirty) {
            self.persist_path(&name, &mut batch);
        }
        self.kv.write(batch)?;
        self.kv.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.kv.close()?;
        Ok(())
    }
}
