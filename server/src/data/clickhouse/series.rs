//! Tag-set series identity
//!
//! Spans with identical tag sets share a series. Tags are stored once per
//! series in `spans_meta`; each span row only carries the series id.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

use clickhouse::Client;
use fnv::FnvHasher;
use parking_lot::RwLock;

use super::error::ClickhouseError;

/// FNV-1a 64 over the tags sorted by key, each pair hashed as `key\nvalue\n`
pub fn series_id(tags: &HashMap<String, String>) -> u64 {
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort_unstable();

    let mut hasher = FnvHasher::default();
    for (key, value) in pairs {
        hasher.write(key.as_bytes());
        hasher.write(b"\n");
        hasher.write(value.as_bytes());
        hasher.write(b"\n");
    }
    hasher.finish()
}

/// Series ids already present in `spans_meta`
///
/// Grows monotonically after successful sends and is never pruned. A miss
/// only costs a duplicate meta write, which ReplacingMergeTree collapses.
#[derive(Debug, Default)]
pub struct SeriesCache {
    known: RwLock<HashSet<u64>>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the distinct series ids already stored
    pub async fn load(client: &Client) -> Result<Self, ClickhouseError> {
        let ids: Vec<u64> = client
            .query("SELECT DISTINCT series_id FROM spans_meta")
            .fetch_all()
            .await?;
        tracing::debug!(count = ids.len(), "Loaded ClickHouse series cache");
        Ok(Self {
            known: RwLock::new(ids.into_iter().collect()),
        })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.known.read().contains(&id)
    }

    pub fn extend(&self, ids: impl IntoIterator<Item = u64>) {
        self.known.write().extend(ids);
    }

    pub fn len(&self) -> usize {
        self.known.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_tags_hash_to_offset_basis() {
        assert_eq!(series_id(&HashMap::new()), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_series_id_ignores_insertion_order() {
        let a = tags(&[("service_name", "api"), ("org_name", "erda"), ("x", "1")]);
        let b = tags(&[("x", "1"), ("org_name", "erda"), ("service_name", "api")]);
        assert_eq!(series_id(&a), series_id(&b));
    }

    #[test]
    fn test_series_id_separates_key_and_value() {
        // Without the separators these would hash the same bytes
        let a = tags(&[("ab", "c")]);
        let b = tags(&[("a", "bc")]);
        assert_ne!(series_id(&a), series_id(&b));
        assert_ne!(
            series_id(&tags(&[("k", "v1")])),
            series_id(&tags(&[("k", "v2")]))
        );
    }

    #[test]
    fn test_cache_grows_monotonically() {
        let cache = SeriesCache::new();
        assert!(cache.is_empty());
        cache.extend([1, 2]);
        cache.extend([2, 3]);
        assert!(cache.contains(1) && cache.contains(3));
        assert!(!cache.contains(4));
        assert_eq!(cache.len(), 3);
    }
}
