//! Process-local registry of transient (memory-only) arrays.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::schema::ArraySchema;
use crate::types::ArrayId;
use crate::types::QueryId;
use crate::types::VersionId;

/// Identity of a transient array: its name plus the catalog ids it was
/// registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransientKey {
    pub namespace: String,
    pub name: String,
    pub array_id: Option<ArrayId>,
    pub version_id: Option<VersionId>,
}

impl TransientKey {
    pub fn for_schema(schema: &ArraySchema) -> Self {
        Self {
            namespace: schema.namespace.clone(),
            name: schema.name.clone(),
            array_id: schema.array_id,
            version_id: schema.version_id,
        }
    }
}

/// In-memory array backing a transient registration, tagged with the query
/// that created it.
#[derive(Debug)]
pub struct MemArray {
    schema: ArraySchema,
    created_by: QueryId,
}

impl MemArray {
    pub fn new(schema: ArraySchema, created_by: QueryId) -> Self {
        Self { schema, created_by }
    }

    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    pub fn created_by(&self) -> QueryId {
        self.created_by
    }
}

/// Registry of transient arrays owned by one process.
///
/// Nothing here is persisted or shared across processes; each instance keeps
/// its own registry for the lifetime of the process.
#[derive(Debug, Default)]
pub struct TransientRegistry {
    arrays: RwLock<HashMap<TransientKey, Arc<MemArray>>>,
}

impl TransientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `array` under its schema identity, replacing any previous
    /// registration with the same identity.
    pub fn record(&self, array: MemArray) -> Arc<MemArray> {
        let key = TransientKey::for_schema(array.schema());
        let array = Arc::new(array);
        info!(
            namespace = %key.namespace,
            array = %key.name,
            query_id = %array.created_by(),
            "transient array registered"
        );
        self.arrays.write().insert(key, Arc::clone(&array));
        array
    }

    pub fn get(&self, key: &TransientKey) -> Option<Arc<MemArray>> {
        self.arrays.read().get(key).cloned()
    }

    /// Latest registration for a name, regardless of ids.
    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<MemArray>> {
        self.arrays
            .read()
            .iter()
            .filter(|(key, _)| key.namespace == namespace && key.name == name)
            .max_by_key(|(key, _)| (key.array_id, key.version_id))
            .map(|(_, array)| Arc::clone(array))
    }

    pub fn remove(&self, key: &TransientKey) -> Option<Arc<MemArray>> {
        self.arrays.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.arrays.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residency::ResidencySet;
    use crate::schema::ArrayShape;
    use crate::types::InstanceId;

    fn schema(name: &str, id: u64) -> ArraySchema {
        let residency = ResidencySet::new([InstanceId(0)]).unwrap();
        let shape = ArrayShape::new().attribute("v", "double").dimension("i", 0, Some(99), 10);
        let mut schema = ArraySchema::draft("public", name, shape, residency);
        schema.transient = true;
        schema.finalize(ArrayId(id));
        schema
    }

    #[test]
    fn test_record_and_lookup() {
        let registry = TransientRegistry::new();
        assert!(registry.is_empty());

        let query_id = QueryId::new();
        let array = registry.record(MemArray::new(schema("t", 4), query_id));
        assert_eq!(array.created_by(), query_id);
        assert_eq!(registry.len(), 1);

        let found = registry.lookup("public", "t").unwrap();
        assert_eq!(found.schema().array_id, Some(ArrayId(4)));
        assert!(registry.lookup("public", "other").is_none());
    }

    #[test]
    fn test_record_replaces_same_identity() {
        let registry = TransientRegistry::new();
        registry.record(MemArray::new(schema("t", 4), QueryId::new()));
        let second = registry.record(MemArray::new(schema("t", 4), QueryId::new()));
        assert_eq!(registry.len(), 1);

        let key = TransientKey::for_schema(second.schema());
        assert_eq!(registry.get(&key).unwrap().created_by(), second.created_by());
    }

    #[test]
    fn test_lookup_prefers_newest_id() {
        let registry = TransientRegistry::new();
        registry.record(MemArray::new(schema("t", 4), QueryId::new()));
        registry.record(MemArray::new(schema("t", 9), QueryId::new()));

        assert_eq!(registry.lookup("public", "t").unwrap().schema().array_id, Some(ArrayId(9)));
    }

    #[test]
    fn test_remove() {
        let registry = TransientRegistry::new();
        let array = registry.record(MemArray::new(schema("t", 1), QueryId::new()));

        let key = TransientKey::for_schema(array.schema());
        assert!(registry.remove(&key).is_some());
        assert!(registry.is_empty());
    }
}
