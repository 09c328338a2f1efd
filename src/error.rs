//! Crate-level error type.

use std::fmt;

use crate::store::StorageError;
use crate::types::MerkleHash;

/// Convenience alias used by every fallible API in the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level errors surfaced by the claim trie.
#[derive(Debug)]
pub enum Error {
    /// Underlying key-value store failure. Fatal to the current operation;
    /// orchestrator state is left unchanged.
    Storage(StorageError),
    /// The recomputed Merkle root disagrees with the persisted one.
    /// Requires a resync; the trie refuses to run.
    InconsistentState {
        /// Height at which the mismatch was detected.
        height: i32,
        /// Root loaded from the block repository.
        expected: MerkleHash,
        /// Root recomputed from the change log.
        computed: MerkleHash,
    },
    /// A submitted change was rejected synchronously: unknown type,
    /// missing field, name out of bounds, or height out of order.
    InvalidChange(String),
    /// Cooperative cancellation was observed mid-operation. Persistent
    /// state remains at its previous consistent height.
    Interrupted,
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Storage(e) => write!(f, "storage error: {e}"),
            Error::InconsistentState {
                height,
                expected,
                computed,
            } => write!(
                f,
                "inconsistent state at height {height}: persisted root {expected}, computed {computed}"
            ),
            Error::InvalidChange(msg) => write!(f, "invalid change: {msg}"),
            Error::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn display_invalid_change() {
        let e = Error::InvalidChange("empty name".to_string());
        assert_eq!(e.to_string(), "invalid change: empty name");
    }

    #[test]
    fn display_inconsistent_state_names_the_height() {
        let e = Error::InconsistentState {
            height: 42,
            expected: MerkleHash([0u8; 32]),
            computed: MerkleHash([1u8; 32]),
        };
        assert!(e.to_string().contains("height 42"));
    }

    #[test]
    fn storage_errors_keep_their_source() {
        let e: Error = StorageError::Corrupted("bad key").into();
        assert!(e.source().is_some());
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_is_error<E: StdError>() {}
        assert_is_error::<Error>();
    }
}
