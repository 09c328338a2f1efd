//! ClaimTrie orchestrator.
//!
//! Owns the four repositories, the node manager, and the merkle trie,
//! and drives them forward and backward one block at a time. The public
//! surface here is what the enclosing blockchain node calls: submit
//! changes for the next block, append or rewind blocks, and read the
//! per-height consensus root.

use std::path::Path;

use crate::block::BlockRepo;
use crate::change::{Change, ChangeType};
use crate::config::{Backend, Config, Interrupt};
use crate::error::{Error, Result};
use crate::logging::{log_once, warn_once};
use crate::node::manager::{BaseManager, Manager, NormalizingManager};
use crate::node::repo::NodeRepo;
use crate::node::Node;
use crate::param::Params;
use crate::store::{open_database, KvStore, MemoryKv, RocksKv};
use crate::temporal::TemporalRepo;
use crate::trie::hash::EMPTY_TRIE_ROOT;
use crate::trie::{MerkleTrie, PersistentTrie, RamTrie};
use crate::types::{ClaimId, MerkleHash, OutPoint};

/// A merkle trie over named claims, supporting a linear history of
/// commits: one root per block height, rewindable to any earlier height.
pub struct ClaimTrie {
    block_repo: BlockRepo,
    temporal_repo: TemporalRepo,
    node_manager: NormalizingManager<BaseManager>,
    merkle_trie: Box<dyn MerkleTrie>,
    height: i32,
    params: Params,
    interrupt: Interrupt,
}

impl ClaimTrie {
    /// Opens a claim trie per `config` and replays persisted state up to
    /// the last committed height. Fails with
    /// [`Error::InconsistentState`] when the replayed root disagrees
    /// with the persisted one.
    pub fn new(config: Config) -> Result<Self> {
        let params = config.params.clone();

        let (block_kv, temporal_kv, node_kv, trie_kv): (
            Box<dyn KvStore>,
            Box<dyn KvStore>,
            Box<dyn KvStore>,
            Box<dyn KvStore>,
        ) = match &config.backend {
            Backend::Memory => (
                Box::new(MemoryKv::new()),
                Box::new(MemoryKv::new()),
                Box::new(MemoryKv::new()),
                Box::new(MemoryKv::new()),
            ),
            Backend::RocksDb(db_cfg) => {
                let db = open_database(Path::new(&db_cfg.path), db_cfg.create_if_missing)?;
                (
                    Box::new(RocksKv::new(db.clone(), "block")),
                    Box::new(RocksKv::new(db.clone(), "temporal")),
                    Box::new(RocksKv::new(db.clone(), "node")),
                    Box::new(RocksKv::new(db, "trie")),
                )
            }
        };

        let block_repo = BlockRepo::new(block_kv);
        let temporal_repo = TemporalRepo::new(temporal_kv);
        let base = BaseManager::new(NodeRepo::new(node_kv), params.clone());
        let node_manager = NormalizingManager::new(base, params.clone());

        let merkle_trie: Box<dyn MerkleTrie> = if config.ram_trie {
            Box::new(RamTrie::new())
        } else {
            Box::new(PersistentTrie::new(trie_kv))
        };

        let height = block_repo.load_tip()?;

        let mut ct = ClaimTrie {
            block_repo,
            temporal_repo,
            node_manager,
            merkle_trie,
            height,
            params,
            interrupt: config.interrupt,
        };

        if height > 0 {
            let hash = ct.block_repo.get(height)?;
            ct.node_manager.advance_to(height)?;
            ct.merkle_trie
                .set_root(&hash, None, &mut ct.node_manager, &ct.interrupt)?;

            let computed = ct.merkle_hash()?;
            if computed != hash {
                ct.close();
                return Err(Error::InconsistentState {
                    height,
                    expected: hash,
                    computed,
                });
            }
        }

        Ok(ct)
    }

    /// Submits a new claim for the next block.
    pub fn add_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        id: ClaimId,
        amount: i64,
    ) -> Result<()> {
        self.forward_change(Change::new(ChangeType::AddClaim, name, id, outpoint, amount))
    }

    /// Submits a claim update (same id, new outpoint and amount) for the
    /// next block.
    pub fn update_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: i64,
        id: ClaimId,
    ) -> Result<()> {
        self.forward_change(Change::new(
            ChangeType::UpdateClaim,
            name,
            id,
            outpoint,
            amount,
        ))
    }

    /// Submits a claim spend for the next block.
    pub fn spend_claim(&mut self, name: &[u8], outpoint: OutPoint, id: ClaimId) -> Result<()> {
        self.forward_change(Change::new(ChangeType::SpendClaim, name, id, outpoint, 0))
    }

    /// Submits a new support for the next block.
    pub fn add_support(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: i64,
        id: ClaimId,
    ) -> Result<()> {
        self.forward_change(Change::new(
            ChangeType::AddSupport,
            name,
            id,
            outpoint,
            amount,
        ))
    }

    /// Submits a support spend for the next block.
    pub fn spend_support(&mut self, name: &[u8], outpoint: OutPoint, id: ClaimId) -> Result<()> {
        self.forward_change(Change::new(ChangeType::SpendSupport, name, id, outpoint, 0))
    }

    fn forward_change(&mut self, mut chg: Change) -> Result<()> {
        chg.height = self.height + 1;
        self.node_manager.append_change(chg)
    }

    /// Commits the buffered changes as one block: advances every touched
    /// or scheduled name, recomputes the root, and persists it under the
    /// new height.
    pub fn append_block(&mut self) -> Result<()> {
        self.height += 1;

        let touched = self.node_manager.advance_to(self.height)?;
        let expirations = self.temporal_repo.nodes_at(self.height)?;

        let mut update_names = Vec::with_capacity(touched.len() + expirations.len());
        let mut update_heights = Vec::with_capacity(touched.len() + expirations.len());
        // Touched names are recorded at the current height so a rewind
        // can find them.
        for name in &touched {
            update_names.push(name.clone());
            update_heights.push(self.height);
        }

        let mut names = touched;
        names.extend(expirations);
        names.sort();
        names.dedup();

        for name in &names {
            self.merkle_trie.update(name, true);

            let (canonical, next_update) = self.node_manager.next_update_height_of(name)?;
            if next_update <= 0 {
                continue; // the name is gone; that is not an error
            }
            update_names.push(canonical);
            update_heights.push(next_update);
        }
        self.temporal_repo.set_nodes_at(&update_names, &update_heights)?;

        let hit_fork = self.update_trie_for_hash_fork()?;

        let root = self.merkle_hash()?;
        self.block_repo.set(self.height, &root)?;

        if hit_fork {
            // Adopting the fresh root lets the trie release fork-sweep
            // memory.
            self.merkle_trie
                .set_root(&root, Some(&names), &mut self.node_manager, &self.interrupt)?;
        }

        Ok(())
    }

    /// At exactly the hash-fork height, marks every name for re-hashing
    /// under the all-claims scheme.
    fn update_trie_for_hash_fork(&mut self) -> Result<bool> {
        if self.height != self.params.all_claims_in_merkle_fork_height {
            return Ok(false);
        }

        log_once("Marking all trie nodes as dirty for the hash fork...");

        let trie = &mut self.merkle_trie;
        let interrupt = &self.interrupt;
        let mut interrupted = false;
        self.node_manager.iterate_names(&mut |name| {
            if interrupt.is_interrupted() {
                interrupted = true;
                return false;
            }
            trie.update(name, false);
            true
        })?;
        if interrupted {
            return Err(Error::Interrupted);
        }

        log_once("Done. Now recomputing all hashes...");
        Ok(true)
    }

    /// Rewinds to a previously committed height.
    pub fn reset_height(&mut self, height: i32) -> Result<()> {
        if height < 0 || height >= self.height {
            return Err(Error::InvalidChange(format!(
                "cannot reset from height {} to {height}",
                self.height
            )));
        }

        let mut names = Vec::new();
        for h in height + 1..=self.height {
            names.extend(self.temporal_repo.nodes_at(h)?);
        }
        names.sort();
        names.dedup();

        self.node_manager.rewind_to(&names, height)?;
        self.temporal_repo.drop_after(height)?;
        self.block_repo.drop_after(height)?;

        let crossed_hash_fork = self.height >= self.params.all_claims_in_merkle_fork_height
            && height < self.params.all_claims_in_merkle_fork_height;
        self.height = height;

        let hash = if height == 0 {
            EMPTY_TRIE_ROOT
        } else {
            self.block_repo.get(height)?
        };

        // Crossing the hash fork downward invalidates every cached hash,
        // so the trie has to reconsider all names.
        let names_arg: Option<&[Vec<u8>]> = if crossed_hash_fork {
            None
        } else {
            Some(&names)
        };
        self.merkle_trie
            .set_root(&hash, names_arg, &mut self.node_manager, &self.interrupt)?;

        let computed = self.merkle_hash()?;
        if computed != hash {
            return Err(Error::InconsistentState {
                height,
                expected: hash,
                computed,
            });
        }
        Ok(())
    }

    /// Consensus root at the current height, with the hash scheme
    /// selected by the height.
    pub fn merkle_hash(&mut self) -> Result<MerkleHash> {
        if self.height >= self.params.all_claims_in_merkle_fork_height {
            self.merkle_trie
                .merkle_hash_all_claims(&mut self.node_manager)
        } else {
            self.merkle_trie.merkle_hash(&mut self.node_manager)
        }
    }

    /// Current block height.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Node state for `name` at the current height.
    pub fn node(&mut self, name: &[u8]) -> Result<Option<Node>> {
        self.node_manager.node_at(name)
    }

    /// Flushes every repository; failures are logged and swallowed so
    /// the remaining repositories still flush.
    pub fn flush_to_disk(&mut self) {
        if let Err(e) = self.node_manager.flush() {
            warn_once(&format!("during node manager flush: {e}"));
        }
        if let Err(e) = self.temporal_repo.flush() {
            warn_once(&format!("during temporal repo flush: {e}"));
        }
        if let Err(e) = self.merkle_trie.flush() {
            warn_once(&format!("during merkle trie flush: {e}"));
        }
        if let Err(e) = self.block_repo.flush() {
            warn_once(&format!("during block repo flush: {e}"));
        }
    }

    /// Releases all resources, in reverse acquisition order. Errors are
    /// logged, never propagated, so partial teardown still runs.
    pub fn close(&mut self) {
        if let Err(e) = self.merkle_trie.close() {
            log_once(&format!("on cleanup: {e}"));
        }
        if let Err(e) = self.node_manager.close() {
            log_once(&format!("on cleanup: {e}"));
        }
        if let Err(e) = self.temporal_repo.close() {
            log_once(&format!("on cleanup: {e}"));
        }
        if let Err(e) = self.block_repo.close() {
            log_once(&format!("on cleanup: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;

    /// Parameters with forks low enough to cross in a handful of blocks.
    fn low_fork_params() -> Params {
        let mut params = Params::regtest();
        params.normalization_fork_height = 8;
        params.all_claims_in_merkle_fork_height = 12;
        params
    }

    fn trie_with(params: Params) -> ClaimTrie {
        ClaimTrie::new(Config::in_memory(params)).expect("open in-memory trie")
    }

    fn outpoint(byte: u8, index: u32) -> OutPoint {
        OutPoint::new(TxId([byte; 32]), index)
    }

    fn claim_id(byte: u8) -> ClaimId {
        ClaimId([byte; 20])
    }

    fn append_blocks(ct: &mut ClaimTrie, count: usize) {
        for _ in 0..count {
            ct.append_block().expect("append block");
        }
    }

    #[test]
    fn empty_block_commits_the_empty_root_at_height_one() {
        let mut ct = trie_with(Params::regtest());
        ct.append_block().unwrap();

        assert_eq!(ct.height(), 1);
        assert_eq!(ct.merkle_hash().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn first_claim_controls_its_name() {
        let mut ct = trie_with(Params::regtest());
        ct.add_claim(b"hello", outpoint(1, 0), claim_id(1), 100)
            .unwrap();
        ct.append_block().unwrap();

        let node = ct.node(b"hello").unwrap().expect("node exists");
        assert_eq!(node.controlling().unwrap().claim_id, claim_id(1));
        assert_eq!(node.takeover_height(), 1);
        assert_ne!(ct.merkle_hash().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn equal_amounts_resolve_to_the_smaller_outpoint() {
        let mut ct = trie_with(Params::regtest());
        ct.add_claim(b"x", outpoint(1, 0), claim_id(1), 50).unwrap();
        ct.add_claim(b"x", outpoint(2, 0), claim_id(2), 50).unwrap();
        ct.append_block().unwrap();

        let node = ct.node(b"x").unwrap().expect("node exists");
        assert_eq!(node.controlling().unwrap().claim_id, claim_id(1));
    }

    #[test]
    fn delayed_activation_takes_over_on_schedule() {
        let mut ct = trie_with(Params::regtest());
        ct.add_claim(b"n", outpoint(1, 0), claim_id(1), 100).unwrap();
        append_blocks(&mut ct, 100); // heights 1..=100

        ct.add_claim(b"n", outpoint(2, 0), claim_id(2), 200).unwrap();
        append_blocks(&mut ct, 2); // accepted at 101; delay = 100/32 = 3

        assert_eq!(ct.height(), 102);
        append_blocks(&mut ct, 1); // 103: still pending
        let node = ct.node(b"n").unwrap().unwrap();
        assert_eq!(node.controlling().unwrap().claim_id, claim_id(1));

        append_blocks(&mut ct, 1); // 104: activates and takes over
        let node = ct.node(b"n").unwrap().unwrap();
        assert_eq!(node.controlling().unwrap().claim_id, claim_id(2));
        assert_eq!(node.takeover_height(), 104);
    }

    #[test]
    fn roots_are_deterministic_across_instances() {
        let run = || -> Vec<MerkleHash> {
            let mut ct = trie_with(Params::regtest());
            let mut roots = Vec::new();
            ct.add_claim(b"a", outpoint(1, 0), claim_id(1), 10).unwrap();
            ct.add_claim(b"b", outpoint(2, 0), claim_id(2), 20).unwrap();
            ct.append_block().unwrap();
            roots.push(ct.merkle_hash().unwrap());

            ct.add_support(b"a", outpoint(3, 0), claim_id(1), 15).unwrap();
            ct.append_block().unwrap();
            roots.push(ct.merkle_hash().unwrap());

            ct.spend_claim(b"b", outpoint(2, 0), claim_id(2)).unwrap();
            ct.append_block().unwrap();
            roots.push(ct.merkle_hash().unwrap());
            roots
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn rewind_and_reappend_reproduces_the_root() {
        let mut ct = trie_with(Params::regtest());
        ct.add_claim(b"a", outpoint(1, 0), claim_id(1), 10).unwrap();
        ct.append_block().unwrap();

        ct.add_claim(b"b", outpoint(2, 0), claim_id(2), 20).unwrap();
        ct.append_block().unwrap();
        let committed = ct.merkle_hash().unwrap();

        ct.reset_height(1).unwrap();
        assert_eq!(ct.height(), 1);

        ct.add_claim(b"b", outpoint(2, 0), claim_id(2), 20).unwrap();
        ct.append_block().unwrap();
        assert_eq!(ct.merkle_hash().unwrap(), committed);
    }

    #[test]
    fn rewind_to_zero_restores_the_empty_root() {
        let mut ct = trie_with(Params::regtest());
        ct.add_claim(b"a", outpoint(1, 0), claim_id(1), 10).unwrap();
        ct.append_block().unwrap();
        ct.append_block().unwrap();

        ct.reset_height(0).unwrap();
        assert_eq!(ct.height(), 0);
        assert_eq!(ct.merkle_hash().unwrap(), EMPTY_TRIE_ROOT);
        assert!(ct.node(b"a").unwrap().is_none());
    }

    #[test]
    fn reset_height_rejects_forward_targets() {
        let mut ct = trie_with(Params::regtest());
        ct.append_block().unwrap();
        assert!(ct.reset_height(5).is_err());
        assert!(ct.reset_height(1).is_err());
    }

    #[test]
    fn hash_fork_switches_schemes_and_rewind_restores_the_old_root() {
        let params = low_fork_params();
        let fork = params.all_claims_in_merkle_fork_height;

        let mut ct = trie_with(params);
        ct.add_claim(b"alpha", outpoint(1, 0), claim_id(1), 10).unwrap();
        ct.add_claim(b"beta", outpoint(2, 0), claim_id(2), 20).unwrap();
        ct.append_block().unwrap();
        ct.add_support(b"alpha", outpoint(3, 0), claim_id(1), 5).unwrap();
        ct.append_block().unwrap();

        while ct.height() < fork - 1 {
            ct.append_block().unwrap();
        }
        let pre_fork_root = ct.merkle_hash().unwrap();

        ct.append_block().unwrap();
        assert_eq!(ct.height(), fork);
        let post_fork_root = ct.merkle_hash().unwrap();
        assert_ne!(post_fork_root, pre_fork_root);

        ct.reset_height(fork - 1).unwrap();
        assert_eq!(ct.merkle_hash().unwrap(), pre_fork_root);
    }

    #[test]
    fn normalization_fork_merges_name_casings() {
        let params = low_fork_params();
        let fork = params.normalization_fork_height;

        let mut ct = trie_with(params);
        ct.add_claim(b"HELLO", outpoint(1, 0), claim_id(1), 10).unwrap();
        ct.append_block().unwrap();

        while ct.height() < fork - 1 {
            ct.append_block().unwrap();
        }
        // Below the fork the raw casing is the key.
        let node = ct.node(b"HELLO").unwrap().expect("raw-keyed node");
        assert_eq!(node.claims().len(), 1);

        ct.append_block().unwrap();
        assert_eq!(ct.height(), fork);

        // At the fork height itself lookups normalize, and the stake kept
        // its acceptance height across the move.
        let node = ct.node(b"hello").unwrap().expect("canonical node");
        assert_eq!(node.claims().len(), 1);
        assert_eq!(node.claims()[0].accepted_height, 1);
        let same = ct.node(b"HeLLo").unwrap().expect("any casing resolves");
        assert_eq!(same.claims().len(), 1);
    }

    #[test]
    fn expiration_vacates_the_name_on_schedule() {
        let mut params = Params::regtest();
        params.original_claim_expiration = 5;
        params.extended_claim_expiration_fork_height = 1000;

        let mut ct = trie_with(params);
        ct.add_claim(b"gone", outpoint(1, 0), claim_id(1), 10).unwrap();
        ct.append_block().unwrap();
        let populated = ct.merkle_hash().unwrap();
        assert_ne!(populated, EMPTY_TRIE_ROOT);

        append_blocks(&mut ct, 5); // expires at 1 + 5 = 6
        assert_eq!(ct.height(), 6);
        assert_eq!(ct.merkle_hash().unwrap(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn restart_from_rocksdb_replays_to_the_same_root() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let config = Config {
            backend: Backend::RocksDb(crate::config::RocksDbConfig {
                path: tmp.path().to_string_lossy().to_string(),
                create_if_missing: true,
            }),
            ram_trie: true,
            params: Params::regtest(),
            interrupt: Interrupt::default(),
        };

        let committed = {
            let mut ct = ClaimTrie::new(config.clone()).expect("open");
            ct.add_claim(b"persist", outpoint(1, 0), claim_id(1), 42).unwrap();
            ct.append_block().unwrap();
            ct.add_support(b"persist", outpoint(2, 0), claim_id(1), 8).unwrap();
            ct.append_block().unwrap();
            let root = ct.merkle_hash().unwrap();
            ct.flush_to_disk();
            ct.close();
            root
        };

        let mut reopened = ClaimTrie::new(config).expect("reopen");
        assert_eq!(reopened.height(), 2);
        assert_eq!(reopened.merkle_hash().unwrap(), committed);
        let node = reopened.node(b"persist").unwrap().expect("node survives");
        assert_eq!(node.controlling().unwrap().claim_id, claim_id(1));
        reopened.close();
    }

    #[test]
    fn persistent_trie_variant_matches_the_ram_variant() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let mut config = Config {
            backend: Backend::RocksDb(crate::config::RocksDbConfig {
                path: tmp.path().to_string_lossy().to_string(),
                create_if_missing: true,
            }),
            ram_trie: false,
            params: Params::regtest(),
            interrupt: Interrupt::default(),
        };

        let persisted = {
            let mut ct = ClaimTrie::new(config.clone()).expect("open persistent");
            ct.add_claim(b"both", outpoint(1, 0), claim_id(1), 10).unwrap();
            ct.append_block().unwrap();
            let root = ct.merkle_hash().unwrap();
            ct.flush_to_disk();
            ct.close();
            root
        };

        // The RAM variant over the same change log computes the same root.
        config.ram_trie = true;
        let mut ram = ClaimTrie::new(config).expect("reopen with ram trie");
        assert_eq!(ram.merkle_hash().unwrap(), persisted);
        ram.close();
    }
}
