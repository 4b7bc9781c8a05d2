//! Catalog lock coordination for array DDL.
//!
//! A creation statement takes an exclusive lock on `(namespace, array)` before
//! execution. The lock belongs to the query and is dropped by
//! [`QueryContext::finish`](crate::query::QueryContext::finish).

use std::sync::Arc;

use async_trait::async_trait;
use residency_coordination::CoordinationError;
use residency_coordination::LockHolder;
use residency_coordination::LockManager;
pub use residency_coordination::LockMode;
use residency_kv::KeyValueStore;
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::warn;

use crate::error::ResidencyError;
use crate::query::QueryContext;
use crate::schema::is_name_versioned;
use crate::schema::validate_array_name;
use crate::types::InstanceId;
use crate::types::QueryId;

/// Role of the instance requesting a lock within its query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRole {
    Coordinator,
    Worker,
}

/// Request for, or grant of, a catalog lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDescriptor {
    pub namespace: String,
    pub array: String,
    pub query_id: QueryId,
    pub owner_instance: InstanceId,
    pub role: LockRole,
    pub mode: LockMode,
}

impl LockDescriptor {
    pub fn lock_name(&self) -> String {
        format!("{}/{}", self.namespace, self.array)
    }
}

/// Cluster-wide lock table.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Returns the descriptor carrying the mode actually granted.
    async fn request_lock(&self, desc: &LockDescriptor) -> Result<LockDescriptor, CoordinationError>;

    /// Returns whether the query held the lock.
    async fn release_lock(&self, desc: &LockDescriptor) -> Result<bool, CoordinationError>;
}

/// [`LockService`] backed by a [`LockManager`] over the shared store.
pub struct KvLockService {
    manager: LockManager<dyn KeyValueStore>,
}

impl KvLockService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            manager: LockManager::new(store),
        }
    }
}

#[async_trait]
impl LockService for KvLockService {
    async fn request_lock(&self, desc: &LockDescriptor) -> Result<LockDescriptor, CoordinationError> {
        let holder = LockHolder {
            query_id: desc.query_id.to_string(),
            instance_id: desc.owner_instance.0,
        };
        let grant = self.manager.try_acquire(&desc.lock_name(), &holder, desc.mode).await?;
        Ok(LockDescriptor {
            mode: grant.mode,
            ..desc.clone()
        })
    }

    async fn release_lock(&self, desc: &LockDescriptor) -> Result<bool, CoordinationError> {
        self.manager.release_query(&desc.lock_name(), &desc.query_id.to_string()).await
    }
}

/// Take the exclusive creation lock on `namespace.array` for `query`.
///
/// A conflicting holder is reported as [`ResidencyError::LockDenied`]. An
/// empty, malformed or versioned name, or a grant weaker than exclusive, is a
/// [`ResidencyError::ProtocolInvariantViolation`].
pub async fn acquire_array_lock(
    query: &QueryContext,
    namespace: &str,
    array: &str,
) -> Result<LockDescriptor, ResidencyError> {
    if is_name_versioned(array) {
        error!(query_id = %query.query_id(), namespace, array, "lock requested on versioned array name");
        return Err(ResidencyError::ProtocolInvariantViolation {
            context: format!("array name '{array}' must be unversioned when locking for creation"),
        });
    }
    if let Err(reason) = validate_array_name(namespace, array) {
        error!(query_id = %query.query_id(), namespace, array, %reason, "lock requested on malformed array name");
        return Err(ResidencyError::ProtocolInvariantViolation {
            context: format!("cannot lock array '{namespace}.{array}': {reason}"),
        });
    }

    let desc = LockDescriptor {
        namespace: namespace.to_string(),
        array: array.to_string(),
        query_id: query.query_id(),
        owner_instance: query.local_instance(),
        role: if query.is_coordinator() {
            LockRole::Coordinator
        } else {
            LockRole::Worker
        },
        mode: LockMode::Exclusive,
    };

    let granted = match query.request_lock(&desc).await {
        Ok(granted) => granted,
        Err(CoordinationError::LockHeld { holder_query, .. }) => {
            warn!(query_id = %query.query_id(), namespace, array, %holder_query, "array lock denied");
            return Err(ResidencyError::LockDenied {
                namespace: namespace.to_string(),
                array: array.to_string(),
                holder_query,
            });
        }
        Err(source) => {
            return Err(ResidencyError::Coordination {
                operation: "array lock request",
                source,
            });
        }
    };

    if granted.mode < LockMode::Exclusive {
        error!(
            query_id = %query.query_id(),
            namespace,
            array,
            requested = %desc.mode,
            granted = %granted.mode,
            "lock service granted a weaker mode than requested"
        );
        return Err(ResidencyError::ProtocolInvariantViolation {
            context: format!(
                "lock on {namespace}.{array} granted in {} mode, exclusive required",
                granted.mode
            ),
        });
    }

    Ok(granted)
}
