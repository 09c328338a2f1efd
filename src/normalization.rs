//! Name normalization.
//!
//! From the normalization fork onward, names are compared in a canonical
//! form: Unicode NFD followed by full case folding. Only the leading
//! UTF-8-valid portion of a name is normalized; any trailing bytes that do
//! not decode are carried through untouched, so names that were never
//! valid UTF-8 keep their raw identity.

use unicode_normalization::UnicodeNormalization;

use crate::param::Params;

/// Returns the canonical form of `name`.
pub fn normalize(name: &[u8]) -> Vec<u8> {
    let (valid, rest) = match std::str::from_utf8(name) {
        Ok(s) => (s, &[][..]),
        Err(e) => {
            let cut = e.valid_up_to();
            // Safe split: everything before `cut` decoded.
            (std::str::from_utf8(&name[..cut]).unwrap_or(""), &name[cut..])
        }
    };

    if valid.is_empty() {
        return name.to_vec();
    }

    let decomposed: String = valid.nfd().collect();
    let folded = caseless::default_case_fold_str(&decomposed);

    let mut out = folded.into_bytes();
    out.extend_from_slice(rest);
    out
}

/// Normalizes `name` when `height` has reached the normalization fork;
/// passes it through unchanged below the fork.
pub fn normalize_if_necessary(name: &[u8], height: i32, params: &Params) -> Vec<u8> {
    if height < params.normalization_fork_height {
        return name.to_vec();
    }
    normalize(name)
}
