//! Marker-set canonicalization.
//!
//! A fiducial may be a single tag or a bundle of tags reported together as one
//! detection. Upstream detectors list the sub-ids in no particular order, so
//! every lookup goes through a canonical string key: the ids sorted ascending
//! and joined with [`KEY_SEPARATOR`].
//!
//! ```rust
//! use tagloc_perception::marker::canonicalize;
//!
//! assert_eq!(canonicalize(&[7, 2, 5]), "2,5,7");
//! assert_eq!(canonicalize(&[]), "");
//! ```

use tagloc_types::LocalizerError;

/// Separator between sub-ids in a canonical key.
pub const KEY_SEPARATOR: char = ',';

/// Render an id-set as its canonical key.
///
/// The empty set maps to the empty string, which callers must treat as a
/// sentinel rather than a usable key.
pub fn canonicalize(ids: &[u32]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// Parse a key written by hand (e.g. in a config file) and return its
/// canonical form, so `"7, 2"` and `"2,7"` name the same marker.
///
/// # Errors
///
/// Returns [`LocalizerError::InvalidConfig`] when the key is empty or contains
/// anything other than non-negative integers.
pub fn normalize_key(key: &str) -> Result<String, LocalizerError> {
    let ids = key
        .split(KEY_SEPARATOR)
        .map(|part| {
            part.trim().parse::<u32>().map_err(|e| {
                LocalizerError::InvalidConfig(format!("bad marker id {part:?} in key {key:?}: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(canonicalize(&ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id() {
        assert_eq!(canonicalize(&[42]), "42");
    }

    #[test]
    fn empty_set_is_empty_string() {
        assert_eq!(canonicalize(&[]), "");
    }

    #[test]
    fn every_permutation_gives_same_key() {
        let perms: [[u32; 3]; 6] = [
            [1, 10, 3],
            [1, 3, 10],
            [3, 1, 10],
            [3, 10, 1],
            [10, 1, 3],
            [10, 3, 1],
        ];
        for p in perms {
            assert_eq!(canonicalize(&p), "1,3,10", "permutation {p:?}");
        }
    }

    #[test]
    fn sorts_numerically_not_lexically() {
        assert_eq!(canonicalize(&[10, 9]), "9,10");
    }

    #[test]
    fn normalize_accepts_any_order_and_spaces() {
        assert_eq!(normalize_key("7, 2").unwrap(), "2,7");
        assert_eq!(normalize_key("0").unwrap(), "0");
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(normalize_key(""), Err(LocalizerError::InvalidConfig(_))));
        assert!(matches!(normalize_key("a,1"), Err(LocalizerError::InvalidConfig(_))));
        assert!(matches!(normalize_key("-1"), Err(LocalizerError::InvalidConfig(_))));
    }
}
