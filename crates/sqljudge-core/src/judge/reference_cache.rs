use crate::model::ResultTable;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Read-through cache of reference results. Only successful results are
/// stored; a failed reference runs again on the next request.
#[derive(Clone)]
pub struct ReferenceCache {
    inner: Cache<String, Arc<ResultTable>>,
}

impl ReferenceCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// The row cap is part of the key because it decides whether the same
    /// statement succeeds.
    pub fn key(dataset: &str, sql: &str, max_rows: usize) -> String {
        let mut h = Sha256::new();
        h.update(dataset.as_bytes());
        h.update(b"\n");
        h.update(max_rows.to_string().as_bytes());
        h.update(b"\n");
        h.update(sql.trim().as_bytes());
        hex::encode(h.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResultTable>> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: String, table: Arc<ResultTable>) {
        self.inner.insert(key, table);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn key_separates_datasets_and_limits() {
        let a = ReferenceCache::key("ds_a", "SELECT 1", 100);
        assert_eq!(a.len(), 64);
        assert_eq!(a, ReferenceCache::key("ds_a", "  SELECT 1\n", 100));
        assert_ne!(a, ReferenceCache::key("ds_b", "SELECT 1", 100));
        assert_ne!(a, ReferenceCache::key("ds_a", "SELECT 1", 10));
    }

    #[test]
    fn stores_and_returns_shared_tables() {
        let cache = ReferenceCache::new(Duration::from_secs(60), 8);
        let table =
            Arc::new(ResultTable::new(vec!["x".into()], vec![vec![Value::Integer(1)]]).unwrap());
        cache.insert("k".into(), Arc::clone(&table));
        let hit = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&hit, &table));
        cache.clear();
        assert!(cache.get("k").is_none());
    }
}
