//! In-memory key-value store.
//!
//! Backed by a `BTreeMap`, so iteration order matches the RocksDB
//! backend's lexicographic byte order. Useful for unit tests, benchmarks,
//! and embedders that do not need persistence.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::{prefix_upper_bound, Batch, BatchOp, KvStore, StorageError};

/// In-memory implementation of [`KvStore`].
#[derive(Default)]
pub struct MemoryKv {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryKv {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        MemoryKv::default()
    }

    /// Returns the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, batch: Batch) -> Result<(), StorageError> {
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StorageError> {
        let upper = prefix_upper_bound(prefix);
        let range = match &upper {
            Some(end) => self
                .entries
                .range::<[u8], _>((Bound::Included(prefix), Bound::Excluded(end.as_slice()))),
            None => self
                .entries
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded)),
        };
        for (key, value) in range {
            if !f(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn last_in_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let upper = prefix_upper_bound(prefix);
        let range = match &upper {
            Some(end) => self
                .entries
                .range::<[u8], _>((Bound::Included(prefix), Bound::Excluded(end.as_slice()))),
            None => self
                .entries
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded)),
        };
        Ok(range.last().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(pairs: &[(&[u8], &[u8])]) -> MemoryKv {
        let mut store = MemoryKv::new();
        let mut batch = Batch::new();
        for (k, v) in pairs {
            batch.put(k.to_vec(), v.to_vec());
        }
        store.write(batch).expect("memory write cannot fail");
        store
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let mut store = store_with(&[(b"a", b"1")]);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));

        let mut batch = Batch::new();
        batch.delete(b"a".to_vec());
        store.write(batch).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_prefix_visits_in_order_and_respects_bounds() {
        let store = store_with(&[
            (b"aa", b"1"),
            (b"ab", b"2"),
            (b"ac", b"3"),
            (b"b", b"4"),
        ]);

        let mut seen = Vec::new();
        store
            .scan_prefix(b"a", &mut |k, _| {
                seen.push(k.to_vec());
                true
            })
            .unwrap();

        assert_eq!(seen, vec![b"aa".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);
    }

    #[test]
    fn scan_prefix_stops_when_callback_returns_false() {
        let store = store_with(&[(b"aa", b"1"), (b"ab", b"2")]);

        let mut count = 0;
        store
            .scan_prefix(b"a", &mut |_, _| {
                count += 1;
                false
            })
            .unwrap();

        assert_eq!(count, 1);
    }

    #[test]
    fn last_in_prefix_finds_greatest_key() {
        let store = store_with(&[(b"aa", b"1"), (b"ab", b"2"), (b"b", b"3")]);
        let (key, value) = store.last_in_prefix(b"a").unwrap().expect("prefix exists");
        assert_eq!(key, b"ab".to_vec());
        assert_eq!(value, b"2".to_vec());

        assert!(store.last_in_prefix(b"c").unwrap().is_none());
    }
}
