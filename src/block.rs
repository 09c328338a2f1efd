//! Block repository: height -> merkle root.
//!
//! Keys are big-endian `u32` heights, values the 32-byte root committed
//! at that height. The greatest stored height doubles as the persisted
//! tip, which is how the orchestrator recovers its position on restart.

use crate::error::Result;
use crate::store::{Batch, KvStore, StorageError};
use crate::types::MerkleHash;

/// Repository of per-height merkle roots.
pub struct BlockRepo {
    kv: Box<dyn KvStore>,
}

impl BlockRepo {
    /// Wraps the given store namespace.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        BlockRepo { kv }
    }

    fn key(height: i32) -> [u8; 4] {
        (height as u32).to_be_bytes()
    }

    /// Returns the greatest height with a stored root, or 0 when the
    /// repository is empty.
    pub fn load_tip(&self) -> Result<i32> {
        match self.kv.last_in_prefix(&[])? {
            None => Ok(0),
            Some((key, _)) => {
                if key.len() != 4 {
                    return Err(StorageError::Corrupted("block key length").into());
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&key);
                Ok(u32::from_be_bytes(raw) as i32)
            }
        }
    }

    /// Fetches the root stored for `height`.
    pub fn get(&self, height: i32) -> Result<MerkleHash> {
        let value = self
            .kv
            .get(&Self::key(height))?
            .ok_or(StorageError::Corrupted("missing block root"))?;
        MerkleHash::from_slice(&value)
            .ok_or_else(|| StorageError::Corrupted("block root length").into())
    }

    /// Stores the root for `height`, overwriting any previous value.
    pub fn set(&mut self, height: i32, hash: &MerkleHash) -> Result<()> {
        let mut batch = Batch::new();
        batch.put(Self::key(height).to_vec(), hash.0.to_vec());
        self.kv.write(batch)?;
        Ok(())
    }

    /// Removes every root stored above `height`, so a restart after a
    /// rewind recovers the rewound tip.
    pub fn drop_after(&mut self, height: i32) -> Result<()> {
        let start = Self::key(height.saturating_add(1));
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
