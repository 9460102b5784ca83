//! [`TrackedMarkerRegistry`] – which markers get re-published, and where.
//!
//! Built once from configuration and never mutated afterwards. Keys are
//! normalized with [`normalize_key`], so `"3,1"` and `"1,3"` register the same
//! marker.

use std::collections::BTreeMap;

use tagloc_types::LocalizerError;

use crate::marker::normalize_key;

/// Immutable mapping from canonical marker key to output channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedMarkerRegistry {
    channels: BTreeMap<String, String>,
}

impl TrackedMarkerRegistry {
    /// An empty registry: no marker other than the observer is published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(key, channel)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizerError::InvalidConfig`] when a key is not a list of
    /// integer ids, when a channel name is empty, or when two keys normalize
    /// to the same marker.
    pub fn from_entries<I, K, C>(entries: I) -> Result<Self, LocalizerError>
    where
        I: IntoIterator<Item = (K, C)>,
        K: AsRef<str>,
        C: Into<String>,
    {
        let mut channels = BTreeMap::new();
        for (key, channel) in entries {
            let raw = key.as_ref();
            let canonical = normalize_key(raw)?;
            let channel = channel.into();
            if channel.trim().is_empty() {
                return Err(LocalizerError::InvalidConfig(format!(
                    "marker {raw:?} has an empty channel name"
                )));
            }
            if channels.insert(canonical.clone(), channel).is_some() {
                return Err(LocalizerError::InvalidConfig(format!(
                    "marker {canonical:?} is registered more than once"
                )));
            }
        }
        Ok(Self { channels })
    }

    /// Output channel for a canonical key, if the marker is tracked.
    pub fn channel_for(&self, key: &str) -> Option<&str> {
        self.channels.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(key)
    }

    /// `(key, channel)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.channels.iter().map(|(k, c)| (k.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_canonicalized() {
        let reg = TrackedMarkerRegistry::from_entries([("3,1", "car"), ("5", "ball")]).unwrap();
        assert_eq!(reg.channel_for("1,3"), Some("car"));
        assert_eq!(reg.channel_for("3,1"), None);
        assert_eq!(reg.channel_for("5"), Some("ball"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unknown_key_has_no_channel() {
        let reg = TrackedMarkerRegistry::from_entries([("5", "ball")]).unwrap();
        assert!(!reg.contains("6"));
        assert!(reg.channel_for("").is_none());
    }

    #[test]
    fn duplicate_after_normalization_is_rejected() {
        let err = TrackedMarkerRegistry::from_entries([("1,2", "a"), ("2,1", "b")]).unwrap_err();
        assert!(matches!(err, LocalizerError::InvalidConfig(_)));
    }

    #[test]
    fn empty_channel_is_rejected() {
        let err = TrackedMarkerRegistry::from_entries([("1", " ")]).unwrap_err();
        assert!(matches!(err, LocalizerError::InvalidConfig(_)));
    }

    #[test]
    fn bad_key_is_rejected() {
        assert!(TrackedMarkerRegistry::from_entries([("car", "car")]).is_err());
    }

    #[test]
    fn iter_is_sorted_by_key() {
        let reg = TrackedMarkerRegistry::from_entries([("9", "b"), ("10", "c"), ("1", "a")]).unwrap();
        let keys: Vec<&str> = reg.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1", "10", "9"]);
    }
}
