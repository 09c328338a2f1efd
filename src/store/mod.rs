//! Ordered key-value storage abstraction.
//!
//! Every repository in the crate talks to an opaque, ordered,
//! byte-key/byte-value store through the [`KvStore`] trait. Two backends
//! implement it:
//!
//! - an in-memory store ([`mem::MemoryKv`]) suitable for tests and light
//!   embedders,
//! - a RocksDB column-family-backed store ([`rocksdb::RocksKv`]) for
//!   persistent nodes.

pub mod mem;
pub mod rocksdb;

use std::fmt;

pub use self::mem::MemoryKv;
pub use self::rocksdb::{open_database, RocksKv};

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying RocksDB error.
    RocksDb(::rocksdb::Error),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// Corrupted or malformed persisted data (wrong length, bad tag).
    Corrupted(&'static str),
}

impl From<::rocksdb::Error> for StorageError {
    fn from(e: ::rocksdb::Error) -> Self {
        StorageError::RocksDb(e)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::RocksDb(e) => write!(f, "rocksdb: {e}"),
            StorageError::MissingColumnFamily(cf) => {
                write!(f, "missing column family: {cf}")
            }
            StorageError::Corrupted(what) => write!(f, "corrupted data: {what}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// One operation inside a [`Batch`].
#[derive(Clone, Debug)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key if present.
    Delete(Vec<u8>),
}

/// An ordered list of writes applied atomically.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub(crate) ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Batch::default()
    }

    /// Queues an insert-or-overwrite.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Returns `true` if no operations are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Abstract ordered key-value store.
///
/// Keys iterate in lexicographic byte order. Writes go through [`Batch`]es
/// and are atomic per batch. The interface is deliberately small: the
/// repositories built on top only need point reads, prefix scans, and a
/// way to find the last key under a prefix.
pub trait KvStore {
    /// Fetches the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Applies all operations in `batch` atomically.
    fn write(&mut self, batch: Batch) -> Result<(), StorageError>;

    /// Visits every `(key, value)` pair whose key starts with `prefix`,
    /// in ascending key order. The callback returns `false` to stop early.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StorageError>;

    /// Returns the greatest `(key, value)` pair whose key starts with
    /// `prefix`, if any.
    fn last_in_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Forces buffered writes to durable storage.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Releases resources. Idempotent.
    fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`, or `None` when no upper bound exists (all-0xff prefix).
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(bound);
        }
        bound.pop();
    }
    None
}
