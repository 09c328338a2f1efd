//! Change records.
//!
//! Every mutation of a name's state enters the system as a [`Change`]:
//! an addition, update, or spend of a claim or support at a specific
//! height. Changes for a name form a total order by `(height,
//! within-block sequence)` and are never mutated or reordered once
//! persisted; rewind only prunes records above the target height.
//!
//! The persisted record layout is consensus-fixed:
//!
//! ```text
//! key   = len:u8 ++ name ++ height:be32 ++ seq:be16
//! value = type:u8 ++ outpoint:36 ++ claim_id:20 ++ amount:be64
//!         ++ active_height:be32 ++ visible_height:be32
//! ```
//!
//! `active_height`/`visible_height` are zero in ordinary records; the
//! normalization fork sets them when it re-keys a node so the moved
//! stakes keep their original activation clocks.

use serde::{Deserialize, Serialize};

use crate::store::StorageError;
use crate::types::{ClaimId, OutPoint};

/// Serialized length of a change record value.
pub const RECORD_LEN: usize = 1 + 36 + 20 + 8 + 4 + 4;

/// Kind of mutation a change applies to its name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Accept a new claim.
    AddClaim,
    /// Remove the claim held by the change's outpoint.
    SpendClaim,
    /// Move an existing claim (same id) to a new outpoint and amount
    /// without resetting its activation clock.
    UpdateClaim,
    /// Accept a new support for the change's claim id.
    AddSupport,
    /// Remove the support held by the change's outpoint.
    SpendSupport,
}

impl ChangeType {
    fn to_u8(self) -> u8 {
        match self {
            ChangeType::AddClaim => 0,
            ChangeType::SpendClaim => 1,
            ChangeType::UpdateClaim => 2,
            ChangeType::AddSupport => 3,
            ChangeType::SpendSupport => 4,
        }
    }

    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ChangeType::AddClaim),
            1 => Some(ChangeType::SpendClaim),
            2 => Some(ChangeType::UpdateClaim),
            3 => Some(ChangeType::AddSupport),
            4 => Some(ChangeType::SpendSupport),
            _ => None,
        }
    }
}

/// One ordered mutation of a name's claim set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change {
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Height of the block carrying the change.
    pub height: i32,
    /// Raw name the change targets. Stored under the normalized form
    /// once past the normalization fork.
    pub name: Vec<u8>,
    /// Claim identity the change touches (own id for claims, supported
    /// id for supports).
    pub claim_id: ClaimId,
    /// Output holding the stake.
    pub outpoint: OutPoint,
    /// Stake amount; unused by spends.
    pub amount: i64,
    /// Activation-height override, 0 = unset. Set only by the
    /// normalization fork's re-keying.
    pub active_height: i32,
    /// Acceptance-height override, 0 = unset. Set only by the
    /// normalization fork's re-keying.
    pub visible_height: i32,
}

impl Change {
    /// Creates a change with no overrides. `height` is filled in by the
    /// orchestrator when the change is submitted.
    pub fn new(
        change_type: ChangeType,
        name: &[u8],
        claim_id: ClaimId,
        outpoint: OutPoint,
        amount: i64,
    ) -> Self {
        Change {
            change_type,
            height: 0,
            name: name.to_vec(),
            claim_id,
            outpoint,
            amount,
            active_height: 0,
            visible_height: 0,
        }
    }

    /// Serializes the record value (everything except name and height,
    /// which live in the key).
    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.push(self.change_type.to_u8());
        out.extend_from_slice(&self.outpoint.to_bytes());
        out.extend_from_slice(&self.claim_id.0);
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.extend_from_slice(&self.active_height.to_be_bytes());
        out.extend_from_slice(&self.visible_height.to_be_bytes());
        out
    }

    /// Reconstructs a change from a persisted key's name and height plus
    /// the record value.
    pub fn decode_value(name: &[u8], height: i32, value: &[u8]) -> Result<Self, StorageError> {
        if value.len() != RECORD_LEN {
            return Err(StorageError::Corrupted("change record length"));
        }
        let change_type = ChangeType::from_u8(value[0])
            .ok_or(StorageError::Corrupted("change record type tag"))?;
        let outpoint = OutPoint::from_bytes(&value[1..37])
            .ok_or(StorageError::Corrupted("change record outpoint"))?;
        let mut id = [0u8; 20];
        id.copy_from_slice(&value[37..57]);

        let mut amount = [0u8; 8];
        amount.copy_from_slice(&value[57..65]);
        let mut active = [0u8; 4];
        active.copy_from_slice(&value[65..69]);
        let mut visible = [0u8; 4];
        visible.copy_from_slice(&value[69..73]);

        Ok(Change {
            change_type,
            height,
            name: name.to_vec(),
            claim_id: ClaimId(id),
            outpoint,
            amount: i64::from_be_bytes(amount),
            active_height: i32::from_be_bytes(active),
            visible_height: i32::from_be_bytes(visible),
        })
    }

    /// Returns `true` for change types that create a stake.
    pub fn is_add(&self) -> bool {
        matches!(
            self.change_type,
            ChangeType::AddClaim | ChangeType::AddSupport
        )
    }
}

/// Key prefix covering every record of `name`: length prefix plus the
/// name bytes.
pub fn name_key_prefix(name: &[u8]) -> Vec<u8> {
    debug_assert!(name.len() <= crate::types::MAX_NAME_LEN);
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(name.len() as u8);
    key.extend_from_slice(name);
    key
}

/// Full record key: name prefix, big-endian height, big-endian
/// within-block sequence.
pub fn record_key(name: &[u8], height: i32, seq: u16) -> Vec<u8> {
    let mut key = name_key_prefix(name);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Splits a record key into `(name, height)`.
pub fn parse_record_key(key: &[u8]) -> Result<(&[u8], i32), StorageError> {
    if key.is_empty() {
        return Err(StorageError::Corrupted("empty change key"));
    }
    let name_len = key[0] as usize;
    if key.len() != 1 + name_len + 4 + 2 {
        return Err(StorageError::Corrupted("change key length"));
    }
    let name = &key[1..1 + name_len];
    let mut height = [0u8; 4];
    height.copy_from_slice(&key[1 + name_len..1 + name_len + 4]);
    Ok((name, i32::from_be_bytes(height)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;

    fn sample_change() -> Change {
        let outpoint = OutPoint::new(TxId([9u8; 32]), 2);
        let mut chg = Change::new(
            ChangeType::UpdateClaim,
            b"hello",
            ClaimId([4u8; 20]),
            outpoint,
            1_000_000,
        );
        chg.height = 77;
        chg.active_height = 80;
        chg.visible_height = 12;
        chg
    }

    #[test]
    fn record_value_roundtrips() {
        let chg = sample_change();
        let value = chg.encode_value();
        assert_eq!(value.len(), RECORD_LEN);

        let back = Change::decode_value(&chg.name, chg.height, &value).expect("decode");
        assert_eq!(back.change_type, chg.change_type);
        assert_eq!(back.outpoint, chg.outpoint);
        assert_eq!(back.claim_id, chg.claim_id);
        assert_eq!(back.amount, chg.amount);
        assert_eq!(back.active_height, 80);
        assert_eq!(back.visible_height, 12);
    }

    #[test]
    fn decode_rejects_unknown_type_tag() {
        let mut value = sample_change().encode_value();
        value[0] = 99;
        assert!(Change::decode_value(b"hello", 1, &value).is_err());
    }

    #[test]
    fn record_keys_order_by_height_then_sequence() {
        let a = record_key(b"n", 5, 0);
        let b = record_key(b"n", 5, 1);
        let c = record_key(b"n", 6, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn parse_record_key_recovers_name_and_height() {
        let key = record_key(b"hello", 300, 7);
        let (name, height) = parse_record_key(&key).expect("well-formed key");
        assert_eq!(name, b"hello");
        assert_eq!(height, 300);
    }

    #[test]
    fn name_prefixes_do_not_collide_across_lengths() {
        // "ab" vs "abc": the length byte keeps one from being a key
        // prefix of the other.
        let ab = name_key_prefix(b"ab");
        let abc = name_key_prefix(b"abc");
        assert!(!abc.starts_with(&ab));
    }
}
