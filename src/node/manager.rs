//! Node manager: caching, advancing, and rewinding nodes.
//!
//! The manager sits between the orchestrator and the change log. It
//! buffers incoming changes for the next block, persists them in one
//! batch when the block is appended, and rebuilds nodes on demand from
//! their histories, keeping a bounded cache of the results.
//!
//! [`NormalizingManager`] wraps any manager and applies the name
//! normalization rule from the fork height onward, including the one-time
//! re-keying of every stored name at the fork itself.

use std::collections::{HashMap, VecDeque};

use crate::change::{Change, ChangeType};
use crate::error::{Error, Result};
use crate::logging::log_once;
use crate::node::repo::NodeRepo;
use crate::node::Node;
use crate::normalization::{normalize, normalize_if_necessary};
use crate::param::Params;
use crate::trie::hash;
use crate::types::{MerkleHash, MAX_NAME_LEN};

/// Default bound on the number of cached nodes.
const CACHE_LIMIT: usize = 50_000;

/// Source of per-name hash inputs for the merkle trie.
///
/// The trie never reads node state directly; it pulls one 32-byte input
/// per name through this seam, with the hash scheme selected by the
/// source's current height.
pub trait HashSource {
    /// Hash input for `name`, or `None` when the name has no hashable
    /// state at the current height.
    fn node_hash(&mut self, name: &[u8]) -> Result<Option<MerkleHash>>;

    /// Visits every name with persisted history. The callback returns
    /// `false` to stop early.
    fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()>;
}

/// Cache layer over the change log.
pub trait Manager: HashSource {
    /// Buffers a change for the next block. The change's height must be
    /// exactly one above the current height.
    fn append_change(&mut self, chg: Change) -> Result<()>;

    /// Persists buffered changes and moves to `height`. Returns the
    /// sorted, de-duplicated set of names whose state was (or is due to
    /// be) touched in the covered range.
    fn advance_to(&mut self, height: i32) -> Result<Vec<Vec<u8>>>;

    /// Drops all changes above `height` for the given names and returns
    /// to that height.
    fn rewind_to(&mut self, names: &[Vec<u8>], height: i32) -> Result<()>;

    /// Rebuilds (or fetches from cache) the node for `name` at the
    /// current height.
    fn node_at(&mut self, name: &[u8]) -> Result<Option<Node>>;

    /// Canonical key for `name` plus the next height at which its state
    /// changes (0 when nothing is scheduled).
    fn next_update_height_of(&mut self, name: &[u8]) -> Result<(Vec<u8>, i32)>;

    /// Current height.
    fn height(&self) -> i32;

    /// Forces buffered repository writes to durable storage.
    fn flush(&mut self) -> Result<()>;

    /// Releases the underlying repository. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Bounded insertion-order cache of rebuilt nodes.
struct NodeCache {
    entries: HashMap<Vec<u8>, Node>,
    order: VecDeque<Vec<u8>>,
    limit: usize,
}

impl NodeCache {
    fn new(limit: usize) -> Self {
        NodeCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    fn get(&self, name: &[u8]) -> Option<&Node> {
        self.entries.get(name)
    }

    fn insert(&mut self, name: Vec<u8>, node: Node) {
        while self.entries.len() >= self.limit {
            // The order queue may hold keys already evicted elsewhere;
            // pop until one actually leaves the map.
            match self.order.pop_front() {
                Some(old) => {
                    if self.entries.remove(&old).is_some() {
                        break;
                    }
                }
                None => break,
            }
        }
        if self.entries.insert(name.clone(), node).is_none() {
            self.order.push_back(name);
        }
    }

    fn remove(&mut self, name: &[u8]) {
        self.entries.remove(name);
    }

    fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Node)> {
        self.entries.iter()
    }
}

/// Base manager: owns the change log and the node cache.
pub struct BaseManager {
    repo: NodeRepo,
    params: Params,
    height: i32,
    cache: NodeCache,
    buffered: Vec<Change>,
}

impl BaseManager {
    /// Creates a manager at height 0 over the given repository.
    pub fn new(repo: NodeRepo, params: Params) -> Self {
        BaseManager {
            repo,
            params,
            height: 0,
            cache: NodeCache::new(CACHE_LIMIT),
            buffered: Vec::new(),
        }
    }

    fn validate(&self, chg: &Change) -> Result<()> {
        if chg.name.is_empty() {
            return Err(Error::InvalidChange("empty name".to_string()));
        }
        if chg.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidChange(format!(
                "name of {} bytes exceeds the {MAX_NAME_LEN}-byte bound",
                chg.name.len()
            )));
        }
        if chg.height != self.height + 1 {
            return Err(Error::InvalidChange(format!(
                "change at height {} submitted at height {}",
                chg.height, self.height
            )));
        }
        if chg.is_add() && chg.amount < 0 {
            return Err(Error::InvalidChange("negative amount".to_string()));
        }
        Ok(())
    }
}

impl HashSource for BaseManager {
    fn node_hash(&mut self, name: &[u8]) -> Result<Option<MerkleHash>> {
        let Some(node) = self.node_at(name)? else {
            return Ok(None);
        };
        if self.height >= self.params.all_claims_in_merkle_fork_height {
            Ok(hash::all_claims_node_hash(&node))
        } else {
            Ok(node
                .controlling()
                .map(|c| hash::standard_node_hash(&c.outpoint, node.takeover_height())))
        }
    }

    fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        self.repo.iterate_names(&[], f)
    }
}

impl Manager for BaseManager {
    fn append_change(&mut self, chg: Change) -> Result<()> {
        self.validate(&chg)?;
        self.buffered.push(chg);
        Ok(())
    }

    fn advance_to(&mut self, height: i32) -> Result<Vec<Vec<u8>>> {
        if height <= self.height {
            return Err(Error::InvalidChange(format!(
                "cannot advance from height {} to {height}",
                self.height
            )));
        }

        let buffered = std::mem::take(&mut self.buffered);
        let mut touched: Vec<Vec<u8>> = buffered.iter().map(|c| c.name.clone()).collect();
        self.repo.append_changes(&buffered)?;

        // Cached nodes whose schedule fires inside the covered range are
        // stale from the new height on.
        for (name, node) in self.cache.iter() {
            let next = node.next_update_height(&self.params);
            if next > self.height && next <= height {
                touched.push(name.clone());
            }
        }

        for name in &touched {
            self.cache.remove(name);
        }
        self.height = height;

        touched.sort();
        touched.dedup();
        Ok(touched)
    }

    fn rewind_to(&mut self, names: &[Vec<u8>], height: i32) -> Result<()> {
        if height > self.height {
            return Err(Error::InvalidChange(format!(
                "cannot rewind from height {} to {height}",
                self.height
            )));
        }
        self.buffered.clear();
        for name in names {
            self.repo.drop_changes(name, height)?;
            self.cache.remove(name);
        }
        self.height = height;
        Ok(())
    }

    fn node_at(&mut self, name: &[u8]) -> Result<Option<Node>> {
        if let Some(node) = self.cache.get(name) {
            return Ok(Some(node.clone()));
        }
        let changes = self.repo.load_changes(name)?;
        let Some(node) = Node::from_changes(&changes, self.height, &self.params)? else {
            return Ok(None);
        };
        self.cache.insert(name.to_vec(), node.clone());
        Ok(Some(node))
    }

    fn next_update_height_of(&mut self, name: &[u8]) -> Result<(Vec<u8>, i32)> {
        let next = match self.node_at(name)? {
            Some(node) => node.next_update_height(&self.params),
            None => 0,
        };
        Ok((name.to_vec(), next))
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn flush(&mut self) -> Result<()> {
        self.repo.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.repo.close()
    }
}

/// Manager wrapper that applies name normalization from the fork height.
pub struct NormalizingManager<M: Manager> {
    inner: M,
    params: Params,
}

impl<M: Manager> NormalizingManager<M> {
    /// Wraps `inner`.
    pub fn new(inner: M, params: Params) -> Self {
        NormalizingManager { inner, params }
    }

    fn canonical(&self, name: &[u8]) -> Vec<u8> {
        normalize_if_necessary(name, self.inner.height(), &self.params)
    }

    /// At exactly the fork height, re-keys every name whose normalized
    /// form differs by spending its stakes on the raw key and re-adding
    /// them on the normalized key with their clocks preserved.
    fn add_normalization_fork_changes(&mut self, height: i32) -> Result<()> {
        if height != self.params.normalization_fork_height {
            return Ok(());
        }
        // Only on a live advance across the boundary. A startup replay
        // jumping straight to (or past) the fork height re-reads the
        // re-keying changes already persisted by the original pass.
        if self.inner.height() + 1 != height {
            return Ok(());
        }
        log_once("Re-keying names for the normalization fork...");

        let mut to_move: Vec<Vec<u8>> = Vec::new();
        self.inner.iterate_names(&mut |name| {
            if normalize(name) != name {
                to_move.push(name.to_vec());
            }
            true
        })?;

        for name in to_move {
            let Some(node) = self.inner.node_at(&name)? else {
                continue;
            };
            let normalized = normalize(&name);

            for (stakes, spend_type, add_type) in [
                (node.claims(), ChangeType::SpendClaim, ChangeType::AddClaim),
                (
                    node.supports(),
                    ChangeType::SpendSupport,
                    ChangeType::AddSupport,
                ),
            ] {
                for stake in stakes {
                    let mut spend = Change::new(
                        spend_type,
                        &name,
                        stake.claim_id,
                        stake.outpoint,
                        stake.amount,
                    );
                    spend.height = height;
                    self.inner.append_change(spend)?;

                    let mut add = Change::new(
                        add_type,
                        &normalized,
                        stake.claim_id,
                        stake.outpoint,
                        stake.amount,
                    );
                    add.height = height;
                    add.active_height = stake.active_height;
                    add.visible_height = stake.accepted_height;
                    self.inner.append_change(add)?;
                }
            }
        }
        Ok(())
    }
}

impl<M: Manager> HashSource for NormalizingManager<M> {
    fn node_hash(&mut self, name: &[u8]) -> Result<Option<MerkleHash>> {
        // No normalization here: trie leaves are the stored keys. After
        // the fork, a raw-cased leaf must resolve against its own
        // (emptied) history and prune, while the canonical key carries
        // the moved stakes.
        self.inner.node_hash(name)
    }

    fn iterate_names(&self, f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        self.inner.iterate_names(f)
    }
}

impl<M: Manager> Manager for NormalizingManager<M> {
    fn append_change(&mut self, mut chg: Change) -> Result<()> {
        chg.name = normalize_if_necessary(&chg.name, chg.height, &self.params);
        self.inner.append_change(chg)
    }

    fn advance_to(&mut self, height: i32) -> Result<Vec<Vec<u8>>> {
        self.add_normalization_fork_changes(height)?;
        self.inner.advance_to(height)
    }

    fn rewind_to(&mut self, names: &[Vec<u8>], height: i32) -> Result<()> {
        self.inner.rewind_to(names, height)
    }

    fn node_at(&mut self, name: &[u8]) -> Result<Option<Node>> {
        let canonical = self.canonical(name);
        self.inner.node_at(&canonical)
    }

    fn next_update_height_of(&mut self, name: &[u8]) -> Result<(Vec<u8>, i32)> {
        let canonical = self.canonical(name);
        let (_, next) = self.inner.next_update_height_of(&canonical)?;
        Ok((canonical, next))
    }

    fn height(&self) -> i32 {
        self.inner.height()
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
