//! RocksDB-backed key-value store.
//!
//! One RocksDB instance backs the whole trie, with a dedicated column
//! family per repository:
//!
//! - `"block"`:    height -> merkle root,
//! - `"temporal"`: height ++ name -> (empty),
//! - `"node"`:     name ++ height ++ seq -> change record,
//! - `"trie"`:     name prefix -> trie vertex.
//!
//! Each [`RocksKv`] handle binds one column family of the shared database;
//! handles resolve the family on every call so a missing family surfaces
//! as a typed error instead of a panic.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};

use super::{prefix_upper_bound, Batch, BatchOp, KvStore, StorageError};

/// Column families opened for the trie database, one per repository.
pub const COLUMN_FAMILIES: [&str; 4] = ["block", "temporal", "node", "trie"];

/// Opens (or creates) the shared RocksDB database with all trie column
/// families present.
pub fn open_database(path: &Path, create_if_missing: bool) -> Result<Arc<DB>, StorageError> {
    let mut opts = Options::default();
    opts.create_if_missing(create_if_missing);
    opts.create_missing_column_families(create_if_missing);

    let mut cfs = vec![ColumnFamilyDescriptor::new("default", Options::default())];
    for name in COLUMN_FAMILIES {
        cfs.push(ColumnFamilyDescriptor::new(name, Options::default()));
    }

    let db = DB::open_cf_descriptors(&opts, path, cfs)?;
    Ok(Arc::new(db))
}

/// RocksDB column-family implementation of [`KvStore`].
pub struct RocksKv {
    db: Arc<DB>,
    cf: &'static str,
}

impl RocksKv {
    /// Binds `cf` of the shared database.
    pub fn new(db: Arc<DB>, cf: &'static str) -> Self {
        RocksKv { db, cf }
    }

    fn handle(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(self.cf)
            .ok_or(StorageError::MissingColumnFamily(self.cf))
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.handle()?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn write(&mut self, batch: Batch) -> Result<(), StorageError> {
        let cf = self.handle()?;
        let mut wb = WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => wb.put_cf(&cf, key, value),
                BatchOp::Delete(key) => wb.delete_cf(&cf, key),
            }
        }
        self.db.write(wb)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StorageError> {
        let cf = self.handle()?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if !f(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    fn last_in_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cf = self.handle()?;
        let upper = prefix_upper_bound(prefix);
        let mode = match upper {
            // Seeks to the last key <= upper. The landing key may be the
            // upper bound itself, which is skipped below.
            Some(ref bound) => IteratorMode::From(bound, Direction::Reverse),
            None => IteratorMode::End,
        };
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item?;
            if key.starts_with(prefix) {
                return Ok(Some((key.into_vec(), value.into_vec())));
            }
            if let Some(ref bound) = upper {
                if key.as_ref() >= bound.as_slice() {
                    continue;
                }
            }
            // Every key in [prefix, upper) carries the prefix, so the
            // first smaller non-prefixed key ends the search.
            return Ok(None);
        }
        Ok(None)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let cf = self.handle()?;
        self.db.flush_cf(&cf)?;
        Ok(())
    }
}
