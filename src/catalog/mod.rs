//! Catalog seam: persistent array schemas, the array id sequence, and the
//! registered instance list.

mod kv;

use async_trait::async_trait;
use residency_coordination::CoordinationError;
use residency_kv::KeyValueStoreError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use self::kv::KvCatalog;
use crate::schema::ArraySchema;
use crate::types::ArrayId;
use crate::types::InstanceId;
use crate::types::ServerId;
use crate::types::VersionId;

/// Version selector for [`Catalog::get_array_desc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayVersion {
    /// Latest version, whichever it is.
    Any,
    Exact(VersionId),
}

/// Instance registration as stored in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub server_id: ServerId,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("array {namespace}.{name} does not exist")]
    ArrayDoesNotExist { namespace: String, name: String },

    #[error("array {namespace}.{name} already exists")]
    ArrayAlreadyExists { namespace: String, name: String },

    #[error("invalid schema for {namespace}.{name}: {reason}")]
    InvalidSchema {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("catalog storage error: {source}")]
    Storage {
        #[from]
        source: KeyValueStoreError,
    },

    #[error("corrupted catalog record at {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("array id allocation failed: {source}")]
    IdAllocation { source: CoordinationError },
}

/// Catalog operations used by array creation.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Atomically insert a finalized schema. Fails with
    /// [`CatalogError::ArrayAlreadyExists`] if the name is taken.
    async fn add_array(&self, schema: &ArraySchema) -> Result<(), CatalogError>;

    /// Allocate a globally unique array id.
    async fn next_array_id(&self) -> Result<ArrayId, CatalogError>;

    async fn get_array_desc(
        &self,
        namespace: &str,
        name: &str,
        version: ArrayVersion,
    ) -> Result<ArraySchema, CatalogError>;

    /// All registered instances, in ascending id order.
    async fn get_instances(&self) -> Result<Vec<InstanceRecord>, CatalogError>;

    /// Look up an array name. `Ok` means the array exists and is accessible.
    async fn check_array_access(&self, namespace: &str, name: &str) -> Result<(), CatalogError>;
}

#[async_trait]
impl<T: Catalog + ?Sized> Catalog for std::sync::Arc<T> {
    async fn add_array(&self, schema: &ArraySchema) -> Result<(), CatalogError> {
        (**self).add_array(schema).await
    }

    async fn next_array_id(&self) -> Result<ArrayId, CatalogError> {
        (**self).next_array_id().await
    }

    async fn get_array_desc(
        &self,
        namespace: &str,
        name: &str,
        version: ArrayVersion,
    ) -> Result<ArraySchema, CatalogError> {
        (**self).get_array_desc(namespace, name, version).await
    }

    async fn get_instances(&self) -> Result<Vec<InstanceRecord>, CatalogError> {
        (**self).get_instances().await
    }

    async fn check_array_access(&self, namespace: &str, name: &str) -> Result<(), CatalogError> {
        (**self).check_array_access(namespace, name).await
    }
}
