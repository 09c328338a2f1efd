//! De-duplicated logging.
//!
//! Some conditions repeat on every block once they first occur (a spend
//! of a missing claim replaying from the change log, a flush failure at
//! shutdown). These log through [`log_once`]/[`warn_once`], which fire a
//! given message at most once per process.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static SEEN: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn first_occurrence(message: &str) -> bool {
    let mut seen = match SEEN.lock() {
        Ok(guard) => guard,
        // A poisoned set only risks a repeated log line.
        Err(poisoned) => poisoned.into_inner(),
    };
    seen.insert(message.to_string())
}

/// Logs `message` at info level, at most once per process.
pub fn log_once(message: &str) {
    if first_occurrence(message) {
        tracing::info!("{message}");
    }
}

/// Logs `message` at warn level, at most once per process.
pub fn warn_once(message: &str) {
    if first_occurrence(message) {
        tracing::warn!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_occurrence_is_suppressed() {
        assert!(first_occurrence("logging-test-unique-key"));
        assert!(!first_occurrence("logging-test-unique-key"));
    }

    #[test]
    fn distinct_keys_fire_independently() {
        assert!(first_occurrence("logging-test-key-a"));
        assert!(first_occurrence("logging-test-key-b"));
    }
}
