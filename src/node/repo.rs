//! Change log repository.
//!
//! Append-only, per-name ordered change records. Keys follow the layout
//! in [`crate::change`]; iteration order therefore matches replay order.
//! Each `append_changes` call writes one atomic batch, which is what
//! makes block append all-or-nothing at the storage level.

use std::collections::HashMap;

use crate::change::{self, Change};
use crate::error::Result;
use crate::store::{Batch, KvStore, StorageError};

/// Repository of per-name change histories.
pub struct NodeRepo {
    kv: Box<dyn KvStore>,
}

impl NodeRepo {
    /// Wraps the given store namespace.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        NodeRepo { kv }
    }

    /// Persists `changes` in one atomic batch, assigning each record the
    /// next within-block sequence number for its `(name, height)` pair.
    pub fn append_changes(&mut self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::new();
        let mut sequences: HashMap<Vec<u8>, u16> = HashMap::new();

        for chg in changes {
            let mut group = change::name_key_prefix(&chg.name);
            group.extend_from_slice(&chg.height.to_be_bytes());

            let seq = match sequences.get(&group) {
                Some(last) => last + 1,
                None => self.next_sequence(&group)?,
            };
            sequences.insert(group, seq);

            batch.put(
                change::record_key(&chg.name, chg.height, seq),
                chg.encode_value(),
            );
        }

        self.kv.write(batch)?;
        Ok(())
    }

    /// First unused sequence number under `group` (name plus height).
    fn next_sequence(&self, group: &[u8]) -> Result<u16> {
        match self.kv.last_in_prefix(group)? {
            None => Ok(0),
            Some((key, _)) => {
                if key.len() < 2 {
                    return Err(StorageError::Corrupted("change key length").into());
                }
                let mut raw = [0u8; 2];
                raw.copy_from_slice(&key[key.len() - 2..]);
                Ok(u16::from_be_bytes(raw) + 1)
            }
        }
    }

    /// Loads the full ordered history of `name`.
    pub fn load_changes(&self, name: &[u8]) -> Result<Vec<Change>> {
        let prefix = change::name_key_prefix(name);
        let mut out = Vec::new();
        let mut corrupt = None;
        self.kv.scan_prefix(&prefix, &mut |key, value| {
            let height = match change::parse_record_key(key) {
                Ok((_, height)) => height,
                Err(e) => {
                    corrupt = Some(e);
                    return false;
                }
            };
            match Change::decode_value(name, height, value) {
                Ok(chg) => {
                    out.push(chg);
                    true
                }
                Err(e) => {
                    corrupt = Some(e);
                    false
                }
            }
        })?;
        if let Some(e) = corrupt {
            return Err(e.into());
        }
        Ok(out)
    }

    /// Removes every record of `name` above `height`.
    pub fn drop_changes(&mut self, name: &[u8], height: i32) -> Result<()> {
        let prefix = change::name_key_prefix(name);
        let mut batch = Batch::new();
        let mut corrupt = None;
        self.kv.scan_prefix(&prefix, &mut |key, _| {
            match change::parse_record_key(key) {
                Ok((_, h)) if h > height => batch.delete(key.to_vec()),
                Ok(_) => {}
                Err(e) => {
                    corrupt = Some(e);
                    return false;
                }
            }
            true
        })?;
        if let Some(e) = corrupt {
            return Err(e.into());
        }
        if !batch.is_empty() {
            self.kv.write(batch)?;
        }
        Ok(())
    }

    /// Visits every distinct name starting with `prefix` (empty prefix =
    /// all names) that has at least one record, in ascending name order
    /// (length first, per the key layout). The callback returns `false`
    /// to stop early.
    ///
    /// The length byte leading every key means a name prefix is not a
    /// key prefix, so this scans the whole namespace and filters.
    pub fn iterate_names(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8]) -> bool) -> Result<()> {
        let mut last: Option<Vec<u8>> = None;
        let mut corrupt = None;
        self.kv.scan_prefix(&[], &mut |key, _| {
            let name = match change::parse_record_key(key) {
                Ok((name, _)) => name,
                Err(e) => {
                    corrupt = Some(e);
                    return false;
                }
            };
            if !name.starts_with(prefix) || last.as_deref() == Some(name) {
                return true;
            }
            last = Some(name.to_vec());
            f(name)
        })?;
        if let Some(e) = corrupt {
            return Err(e.into());
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
