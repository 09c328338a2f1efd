//! Top-level configuration for a claim trie instance.
//!
//! This aggregates everything the orchestrator needs to wire itself up:
//!
//! - the storage backend (in-memory, or a RocksDB database path),
//! - the trie variant (RAM-only or persistent),
//! - the network's consensus parameters,
//! - a cooperative interrupt flag for long operations.
//!
//! The embedding node constructs one of these from its own configuration
//! surface; everything has a usable default.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::param::Params;

/// Cooperative cancellation flag.
///
/// Cloned handles share one flag. Long operations (the hash-fork sweep
/// and full trie rebuilds) poll it and abort with
/// [`crate::Error::Interrupted`] once set, leaving persistent state at
/// its previous consistent height.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a fresh, unset flag.
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// Requests cancellation.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Configuration for the RocksDB backend.
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the database directory.
    pub path: String,
    /// Whether to create the database and missing column families if
    /// they do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        RocksDbConfig {
            path: "data/claimtrie-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// Storage backend selection.
#[derive(Clone, Debug)]
pub enum Backend {
    /// Everything in memory; state is lost on drop. Meant for tests and
    /// light embedders.
    Memory,
    /// RocksDB database with one column family per repository.
    RocksDb(RocksDbConfig),
}

/// Top-level configuration for a claim trie.
#[derive(Clone, Debug)]
pub struct Config {
    /// Storage backend for all four repositories.
    pub backend: Backend,
    /// Use the in-memory trie variant instead of the persistent one.
    pub ram_trie: bool,
    /// Consensus parameters of the target network.
    pub params: Params,
    /// Cooperative interrupt flag shared with the embedding node.
    pub interrupt: Interrupt,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: Backend::RocksDb(RocksDbConfig::default()),
            ram_trie: true,
            params: Params::default(),
            interrupt: Interrupt::default(),
        }
    }
}

impl Config {
    /// In-memory configuration with the given parameters.
    pub fn in_memory(params: Params) -> Self {
        Config {
            backend: Backend::Memory,
            ram_trie: true,
            params,
            interrupt: Interrupt::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_rocksdb_and_ram_trie() {
        let cfg = Config::default();
        assert!(cfg.ram_trie);
        assert!(matches!(cfg.backend, Backend::RocksDb(_)));
    }

    #[test]
    fn interrupt_is_shared_across_clones() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        assert!(!clone.is_interrupted());

        interrupt.interrupt();
        assert!(clone.is_interrupted());
    }
}
