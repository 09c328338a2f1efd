//! Claim trie library crate.
//!
//! A height-indexed, append-only, rewindable merkle trie tracking named
//! claims and their supports on a UTXO chain. Every block height commits
//! to the full claim set with a single 32-byte root; one claim per name
//! controls it under a deterministic bidding rule with activation delays.
//!
//! The crate provides:
//!
//! - strongly-typed domain types (`types`),
//! - per-network consensus parameters (`param`),
//! - ordered change records with consensus-fixed layouts (`change`),
//! - storage backends behind a small KV trait (`store`),
//! - the per-name node state machine and its manager (`node`),
//! - the merkle trie in RAM and persistent variants (`trie`),
//! - and the top-level orchestrator (`claimtrie`).
//!
//! The enclosing blockchain node drives the orchestrator: submit the
//! block's claim operations, call [`ClaimTrie::append_block`], and
//! compare [`ClaimTrie::merkle_hash`] against the header commitment.
//!
//! ## Example
//!
//! ```ignore
//! use claimtrie::{ClaimTrie, Config};
//!
//! let mut ct = ClaimTrie::new(Config::default())?;
//! ct.add_claim(b"hello", outpoint, id, 100_000)?;
//! ct.append_block()?;
//! let root = ct.merkle_hash()?;
//! ```

pub mod block;
pub mod change;
pub mod config;
pub mod logging;
pub mod node;
pub mod normalization;
pub mod param;
pub mod store;
pub mod temporal;
pub mod trie;
pub mod types;

mod claimtrie;
mod error;

// Re-export the orchestrator and its wiring.
pub use claimtrie::ClaimTrie;
pub use config::{Backend, Config, Interrupt, RocksDbConfig};
pub use error::{Error, Result};
pub use param::Params;

// Re-export "core" domain types at the crate root for convenience.
pub use change::{Change, ChangeType};
pub use node::Node;
pub use types::{Claim, ClaimId, ClaimStatus, MerkleHash, OutPoint, Support, TxId};

// Re-export the storage and trie seams for embedders that bring their
// own backends.
pub use node::manager::{BaseManager, HashSource, Manager, NormalizingManager};
pub use store::{KvStore, MemoryKv, RocksKv};
pub use trie::{MerkleTrie, PersistentTrie, RamTrie};

/// Type alias for the manager stack used by a "typical" node: the base
/// manager wrapped with name normalization.
pub type NodeManager = NormalizingManager<BaseManager>;
