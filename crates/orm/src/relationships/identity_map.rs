//! Identity map - process-wide record snapshots keyed by model and primary key

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backends::DatabaseValue;
use crate::model::Record;

/// Cache key for a stored record
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct IdentityKey {
    model: String,
    key: String,
}

impl IdentityKey {
    fn new(model: &str, key: &DatabaseValue) -> Self {
        Self {
            model: model.to_string(),
            key: key.key_string(),
        }
    }
}

/// Hit/miss counters of an [`IdentityMap`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMapMetrics {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub invalidations: u64,
}

impl IdentityMapMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Loaded records by (model, primary key).
///
/// Entries are snapshots: `get` hands out a copy, so callers never share
/// mutable state through the map. Writes go through a sharded lock.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: DashMap<IdentityKey, Record>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str, key: &DatabaseValue) -> Option<Record> {
        match self.entries.get(&IdentityKey::new(model, key)) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a snapshot of a persisted record; new records are ignored.
    ///
    /// Resolved relations are not part of the snapshot.
    pub fn store(&self, record: &Record) {
        let Some(key) = record.primary_key() else {
            return;
        };
        self.entries
            .insert(IdentityKey::new(record.model_name(), key), record.detached());
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contains(&self, model: &str, key: &DatabaseValue) -> bool {
        self.entries.contains_key(&IdentityKey::new(model, key))
    }

    /// Drop the entry for one key; returns whether one existed
    pub fn invalidate(&self, model: &str, key: &DatabaseValue) -> bool {
        let removed = self.entries.remove(&IdentityKey::new(model, key)).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn invalidate_model(&self, model: &str) {
        self.entries.retain(|key, _| key.model != model);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> IdentityMapMetrics {
        IdentityMapMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Row;
    use crate::model::RelationValue;
    use crate::schema::{ModelSchema, SqlType};
    use std::sync::Arc;

    fn customer(id: i64, name: &str) -> Record {
        let schema = Arc::new(ModelSchema::new("Customer", "customers").column("name", SqlType::Text));
        Record::from_row(schema, Row::new().with("id", id).with("name", name))
    }

    #[test]
    fn test_store_and_get_returns_snapshot() {
        let map = IdentityMap::new();
        let mut original = customer(7, "Acme");
        map.store(&original);

        original.set("name", "Changed").unwrap();

        let cached = map.get("Customer", &DatabaseValue::Int64(7)).unwrap();
        assert_eq!(cached.value("name"), Some(&DatabaseValue::from("Acme")));
        assert!(map.get("Customer", &DatabaseValue::Int64(8)).is_none());
        assert!(map.get("Order", &DatabaseValue::Int64(7)).is_none());

        let metrics = map.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 2);
        assert!((metrics.hit_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_drops_resolved_relations() {
        let map = IdentityMap::new();
        let mut record = customer(7, "Acme");
        record.cache_relation("orders", RelationValue::Many(vec![customer(9, "Stale")]));
        map.store(&record);

        let cached = map.get("Customer", &DatabaseValue::Int64(7)).unwrap();
        assert!(!cached.is_relation_loaded("orders"));
        assert!(record.is_relation_loaded("orders"));
    }

    #[test]
    fn test_keys_match_across_integer_widths() {
        let map = IdentityMap::new();
        map.store(&customer(7, "Acme"));
        assert!(map.contains("Customer", &DatabaseValue::Int32(7)));
        assert!(map.contains("Customer", &DatabaseValue::from("7")));
    }

    #[test]
    fn test_invalidate() {
        let map = IdentityMap::new();
        map.store(&customer(1, "Acme"));
        map.store(&customer(2, "Globex"));

        assert!(map.invalidate("Customer", &DatabaseValue::Int64(1)));
        assert!(!map.invalidate("Customer", &DatabaseValue::Int64(1)));
        assert_eq!(map.len(), 1);

        map.invalidate_model("Customer");
        assert!(map.is_empty());
        assert_eq!(map.metrics().invalidations, 1);
    }

    #[test]
    fn test_new_records_are_not_stored() {
        let map = IdentityMap::new();
        let schema = Arc::new(ModelSchema::new("Customer", "customers"));
        map.store(&Record::new(schema));
        assert!(map.is_empty());
    }
}
