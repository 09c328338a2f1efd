//! Temporal repository: height -> names needing re-evaluation.
//!
//! Whenever a name's state is going to change at a future height
//! (activation, expiration, scheduled takeover) the orchestrator records
//! `(name, height)` here; appending a block then re-evaluates exactly the
//! names listed at the new height. Entries at the current height are also
//! written for every touched name so a rewind can find everything that
//! changed in the rewound range.
//!
//! Keys are big-endian `u32` heights followed by the length-prefixed
//! name; values are empty. Duplicate insertions are idempotent by
//! construction.

use crate::change::name_key_prefix;
use crate::error::{Error, Result};
use crate::store::{Batch, KvStore, StorageError};

/// Repository of the per-height refresh schedule.
pub struct TemporalRepo {
    kv: Box<dyn KvStore>,
}

impl TemporalRepo {
    /// Wraps the given store namespace.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        TemporalRepo { kv }
    }

    fn key(height: i32, name: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + 1 + name.len());
        key.extend_from_slice(&(height as u32).to_be_bytes());
        key.extend_from_slice(&name_key_prefix(name));
        key
    }

    /// Returns every name scheduled for re-evaluation at `height`, in
    /// ascending name order.
    pub fn nodes_at(&self, height: i32) -> Result<Vec<Vec<u8>>> {
        let prefix = (height as u32).to_be_bytes();
        let mut names = Vec::new();
        let mut bad_key = false;
        self.kv.scan_prefix(&prefix, &mut |key, _| {
            // key = height:4 ++ len:u8 ++ name
            if key.len() < 5 || key.len() != 5 + key[4] as usize {
                bad_key = true;
                return false;
            }
            names.push(key[5..].to_vec());
            true
        })?;
        if bad_key {
            return Err(StorageError::Corrupted("temporal key length").into());
        }
        Ok(names)
    }

    /// Records that each `names[i]` needs attention at `heights[i]`.
    ///
    /// The two slices are parallel arrays and must have equal length.
    pub fn set_nodes_at(&mut self, names: &[Vec<u8>], heights: &[i32]) -> Result<()> {
        if names.len() != heights.len() {
            return Err(Error::InvalidChange(format!(
                "temporal arrays differ in length: {} names, {} heights",
                names.len(),
                heights.len()
            )));
        }
        let mut batch = Batch::new();
        for (name, height) in names.iter().zip(heights) {
            batch.put(Self::key(*height, name), Vec::new());
        }
        if !batch.is_empty() {
            self.kv.write(batch)?;
        }
        Ok(())
    }

    /// Removes every schedule entry above `height`.
    pub fn drop_after(&mut self, height: i32) -> Result<()> {
        let start = ((height as u32).saturating_add(1)).to_be_bytes();
        let mut batch = Batch::new();
        self.kv.scan_prefix(&[], &mut |key, _| {
            if key >= &start[..] {
                batch.delete(key.to_vec());
            }
            true
        })?;
        if !batch.is_empty() {
            self.kv.write(batch)?;
        }
        Ok(())
    }

    /// Forces buffered writes to durable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.kv.flush()?;
        Ok(())
    }

    /// Releases the underlying store.
    pub fn close(&mut self) -> Result<()> {
        self.kv.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn repo() -> TemporalRepo {
        TemporalRepo::new(Box::new(MemoryKv::new()))
    }

    #[test]
    fn schedules_names_per_height() {
        let mut repo = repo();
        repo.set_nodes_at(
            &[b"a".to_vec(), b"b".to_vec(), b"a".to_vec()],
            &[10, 10, 11],
        )
        .unwrap();

        assert_eq!(repo.nodes_at(10).unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(repo.nodes_at(11).unwrap(), vec![b"a".to_vec()]);
        assert!(repo.nodes_at(12).unwrap().is_empty());
    }

    #[test]
    fn duplicate_insertions_are_idempotent() {
        let mut repo = repo();
        repo.set_nodes_at(&[b"x".to_vec()], &[5]).unwrap();
        repo.set_nodes_at(&[b"x".to_vec()], &[5]).unwrap();

        assert_eq!(repo.nodes_at(5).unwrap(), vec![b"x".to_vec()]);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let mut repo = repo();
        let err = repo.set_nodes_at(&[b"x".to_vec()], &[]).unwrap_err();
        assert!(err.to_string().contains("temporal arrays"));
    }

    #[test]
    fn drop_after_removes_future_entries_only() {
        let mut repo = repo();
        repo.set_nodes_at(
            &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()],
            &[9, 10, 11],
        )
        .unwrap();

        repo.drop_after(9).unwrap();
        assert_eq!(repo.nodes_at(9).unwrap(), vec![b"a".to_vec()]);
        assert!(repo.nodes_at(10).unwrap().is_empty());
        assert!(repo.nodes_at(11).unwrap().is_empty());
    }
}
