use std::sync::Arc;

use async_trait::async_trait;
use residency_coordination::SequenceConfig;
use residency_coordination::SequenceGenerator;
use residency_kv::KeyValueStore;
use residency_kv::KeyValueStoreError;
use residency_kv::ReadRequest;
use residency_kv::ScanRequest;
use residency_kv::WriteRequest;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ArrayVersion;
use super::Catalog;
use super::CatalogError;
use super::InstanceRecord;
use crate::schema::ArraySchema;
use crate::types::ArrayId;

const ARRAY_PREFIX: &str = "__catalog:array:";
const INSTANCE_PREFIX: &str = "__catalog:instance:";
const ARRAY_ID_SEQUENCE_KEY: &str = "__catalog:sequence:array_id";

/// Catalog stored as JSON records in a shared [`KeyValueStore`].
///
/// Every instance may hold its own `KvCatalog` over the same store; array ids
/// stay unique because each one reserves disjoint batches from the shared
/// sequence.
pub struct KvCatalog {
    store: Arc<dyn KeyValueStore>,
    array_ids: SequenceGenerator<dyn KeyValueStore>,
}

impl KvCatalog {
    pub fn new(store: Arc<dyn KeyValueStore>, id_batch_size: u64) -> Self {
        let array_ids = SequenceGenerator::new(
            Arc::clone(&store),
            ARRAY_ID_SEQUENCE_KEY,
            SequenceConfig {
                batch_size_ids: id_batch_size,
                ..Default::default()
            },
        );
        Self { store, array_ids }
    }

    /// Record an instance and the server it runs on. Re-registering
    /// overwrites the previous record.
    pub async fn register_instance(&self, record: InstanceRecord) -> Result<(), CatalogError> {
        let key = instance_key(record.instance_id.0);
        let value = encode(&key, &record)?;
        self.store.write(WriteRequest::set(key, value)).await?;
        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CatalogError> {
        let result = self.store.read(ReadRequest::new(key)).await?;
        result.kv.map(|kv| decode(key, &kv.value)).transpose()
    }
}

#[async_trait]
impl Catalog for KvCatalog {
    async fn add_array(&self, schema: &ArraySchema) -> Result<(), CatalogError> {
        if !schema.is_finalized() {
            return Err(CatalogError::InvalidSchema {
                namespace: schema.namespace.clone(),
                name: schema.name.clone(),
                reason: "array id and version must be assigned before insert".into(),
            });
        }

        let key = array_key(&schema.namespace, &schema.name);
        let value = encode(&key, schema)?;

        match self.store.write(WriteRequest::compare_and_swap(&key, None, value)).await {
            Ok(_) => {
                debug!(namespace = %schema.namespace, array = %schema.name, "catalog record inserted");
                Ok(())
            }
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Err(CatalogError::ArrayAlreadyExists {
                namespace: schema.namespace.clone(),
                name: schema.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn next_array_id(&self) -> Result<ArrayId, CatalogError> {
        self.array_ids
            .next()
            .await
            .map(ArrayId)
            .map_err(|source| CatalogError::IdAllocation { source })
    }

    async fn get_array_desc(
        &self,
        namespace: &str,
        name: &str,
        version: ArrayVersion,
    ) -> Result<ArraySchema, CatalogError> {
        let missing = || CatalogError::ArrayDoesNotExist {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let schema: ArraySchema = self.read_record(&array_key(namespace, name)).await?.ok_or_else(missing)?;
        match version {
            ArrayVersion::Any => Ok(schema),
            ArrayVersion::Exact(v) if schema.version_id == Some(v) => Ok(schema),
            ArrayVersion::Exact(_) => Err(missing()),
        }
    }

    async fn get_instances(&self) -> Result<Vec<InstanceRecord>, CatalogError> {
        let result = self.store.scan(ScanRequest::prefix(INSTANCE_PREFIX)).await?;
        result.entries.iter().map(|kv| decode(&kv.key, &kv.value)).collect()
    }

    async fn check_array_access(&self, namespace: &str, name: &str) -> Result<(), CatalogError> {
        let key = array_key(namespace, name);
        match self.store.read(ReadRequest::new(&key)).await?.kv {
            Some(_) => Ok(()),
            None => Err(CatalogError::ArrayDoesNotExist {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

fn array_key(namespace: &str, name: &str) -> String {
    format!("{ARRAY_PREFIX}{namespace}/{name}")
}

/// Zero-padded so prefix scans return instances in id order.
fn instance_key(instance_id: u64) -> String {
    format!("{INSTANCE_PREFIX}{instance_id:020}")
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, CatalogError> {
    serde_json::to_string(value).map_err(|e| CatalogError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Result<T, CatalogError> {
    serde_json::from_str(value).map_err(|e| CatalogError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
