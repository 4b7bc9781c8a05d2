use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::protocol::PhysicalCreateWithResidency;
use crate::catalog::Catalog;
use crate::catalog::CatalogError;
use crate::error::ResidencyError;
use crate::lock::LockDescriptor;
use crate::lock::acquire_array_lock;
use crate::membership::capture_snapshot;
use crate::query::QueryContext;
use crate::residency::ResidencyInput;
use crate::residency::ResidencySpec;
use crate::residency::resolve;
use crate::schema::ArrayShape;
use crate::schema::ArraySchema;

/// Arguments of one `create_with_residency` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArrayRequest {
    /// `name` or `namespace.name`.
    pub array_name: String,
    pub shape: ArrayShape,
    /// Create a transient, memory-only array.
    pub temp: bool,
    pub residency: ResidencyInput,
}

impl CreateArrayRequest {
    pub fn new(array_name: impl Into<String>, shape: ArrayShape, temp: bool, residency: ResidencyInput) -> Self {
        Self {
            array_name: array_name.into(),
            shape,
            temp,
            residency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateArray,
}

/// A permission the caller must hold on a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequiredPermission {
    pub namespace: String,
    pub permission: Permission,
}

/// Logical `create_with_residency` operator.
#[derive(Debug, Clone)]
pub struct CreateWithResidency {
    request: CreateArrayRequest,
}

impl CreateWithResidency {
    pub fn new(request: CreateArrayRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &CreateArrayRequest {
        &self.request
    }

    pub fn required_permissions(&self, query: &QueryContext) -> Vec<RequiredPermission> {
        let (namespace, _) = query.namespace_and_array_name(&self.request.array_name);
        vec![RequiredPermission {
            namespace,
            permission: Permission::CreateArray,
        }]
    }

    /// Take the exclusive catalog lock on the target array name.
    pub async fn infer_array_access(&self, query: &QueryContext) -> Result<LockDescriptor, ResidencyError> {
        let (namespace, name) = query.namespace_and_array_name(&self.request.array_name);
        acquire_array_lock(query, &namespace, &name).await
    }

    /// Validate the statement and produce the draft schema carrying the
    /// resolved residency. Nothing is written.
    pub async fn infer_schema(&self, query: &QueryContext) -> Result<ArraySchema, ResidencyError> {
        let (namespace, name) = query.namespace_and_array_name(&self.request.array_name);
        ensure_array_absent(query.catalog(), &namespace, &name).await?;

        let spec = ResidencySpec::parse(&self.request.residency)?;
        let snapshot = capture_snapshot(query.catalog(), query.services().membership.as_ref()).await?;
        let residency = resolve(&spec, &snapshot)?;

        debug!(
            query_id = %query.query_id(),
            %namespace,
            array = %name,
            %residency,
            "residency resolved"
        );
        Ok(ArraySchema::draft(namespace, name, self.request.shape.clone(), residency))
    }

    pub fn into_physical(self, schema: ArraySchema) -> PhysicalCreateWithResidency {
        PhysicalCreateWithResidency::new(self.request, schema)
    }
}

/// Check the catalog for `namespace.name`. Only "does not exist" counts as
/// success; an existing array or any other catalog error is a conflict.
pub(super) async fn ensure_array_absent(catalog: &dyn Catalog, namespace: &str, name: &str) -> Result<(), ResidencyError> {
    let source = match catalog.check_array_access(namespace, name).await {
        Err(CatalogError::ArrayDoesNotExist { .. }) => return Ok(()),
        Ok(()) => CatalogError::ArrayAlreadyExists {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        Err(other) => other,
    };

    Err(ResidencyError::CatalogConflict {
        namespace: namespace.to_string(),
        array: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use residency_kv::DeterministicKeyValueStore;
    use residency_kv::KeyValueStore;

    use super::*;
    use crate::barrier::KvQueryBarrier;
    use crate::catalog::InstanceRecord;
    use crate::catalog::KvCatalog;
    use crate::config::ResidencyConfig;
    use crate::error::ErrorKind;
    use crate::lock::KvLockService;
    use crate::lock::LockMode;
    use crate::membership::LivenessView;
    use crate::query::NodeServices;
    use crate::residency::ResidencySet;
    use crate::transient::TransientRegistry;
    use crate::types::ArrayId;
    use crate::types::InstanceId;
    use crate::types::QueryId;
    use crate::types::ServerId;

    struct Fixture {
        store: Arc<DeterministicKeyValueStore>,
        liveness: LivenessView,
        catalog: Arc<KvCatalog>,
    }

    /// Four instances on two servers, all alive.
    async fn fixture() -> Fixture {
        let store = DeterministicKeyValueStore::new();
        let catalog = Arc::new(KvCatalog::new(store.clone(), 4));
        let liveness = LivenessView::new();
        for id in 0..4u64 {
            catalog
                .register_instance(InstanceRecord {
                    instance_id: InstanceId(id),
                    server_id: ServerId(id / 2),
                })
                .await
                .unwrap();
            liveness.mark_alive(InstanceId(id));
        }
        Fixture {
            store,
            liveness,
            catalog,
        }
    }

    fn query(fx: &Fixture) -> QueryContext {
        let store: Arc<dyn KeyValueStore> = fx.store.clone();
        let services = NodeServices {
            catalog: fx.catalog.clone(),
            membership: Arc::new(fx.liveness.for_instance(InstanceId(0))),
            locks: Arc::new(KvLockService::new(store.clone())),
            barrier: Arc::new(KvQueryBarrier::new(store, Duration::from_millis(5), None)),
            transient: Arc::new(TransientRegistry::new()),
            config: Arc::new(ResidencyConfig::default()),
        };
        let participants = fx.liveness.alive_instances();
        QueryContext::new(QueryId::new(), InstanceId(0), participants, services).unwrap()
    }

    fn op(name: &str, residency: &str) -> CreateWithResidency {
        CreateWithResidency::new(CreateArrayRequest::new(
            name,
            ArrayShape::new().attribute("v", "int64"),
            false,
            ResidencyInput::StringForm(residency.into()),
        ))
    }

    #[tokio::test]
    async fn test_infer_schema_servers() {
        let fx = fixture().await;
        let schema = op("events", "servers=1").infer_schema(&query(&fx)).await.unwrap();

        assert_eq!(schema.namespace, "public");
        assert_eq!(schema.name, "events");
        assert_eq!(schema.residency, ResidencySet::new([InstanceId(2), InstanceId(3)]).unwrap());
        assert!(!schema.is_finalized());
    }

    #[tokio::test]
    async fn test_infer_schema_instance_list() {
        let fx = fixture().await;
        let op = CreateWithResidency::new(CreateArrayRequest::new(
            "lab.events",
            ArrayShape::new(),
            true,
            ResidencyInput::InstanceList(vec![3, 1]),
        ));
        let schema = op.infer_schema(&query(&fx)).await.unwrap();
        assert_eq!(schema.namespace, "lab");
        assert_eq!(schema.residency.as_slice(), &[InstanceId(1), InstanceId(3)]);
    }

    #[tokio::test]
    async fn test_infer_schema_dead_instance() {
        let fx = fixture().await;
        fx.liveness.mark_dead(InstanceId(3));
        let err = op("events", "instances=3").infer_schema(&query(&fx)).await.unwrap_err();
        assert!(matches!(err, ResidencyError::DeadInstance { instance_id: InstanceId(3) }));
    }

    #[tokio::test]
    async fn test_infer_schema_existing_array() {
        let fx = fixture().await;
        let mut existing = ArraySchema::draft(
            "public",
            "events",
            ArrayShape::new(),
            ResidencySet::new([InstanceId(0)]).unwrap(),
        );
        existing.finalize(ArrayId(1));
        fx.catalog.add_array(&existing).await.unwrap();

        let err = op("events", "instances=0").infer_schema(&query(&fx)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogConflict);
        assert!(matches!(
            err,
            ResidencyError::CatalogConflict {
                source: CatalogError::ArrayAlreadyExists { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_parse_error_before_membership() {
        let fx = fixture().await;
        let err = op("events", "hosts=1").infer_schema(&query(&fx)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_infer_array_access() {
        let fx = fixture().await;
        let query = query(&fx);
        let lock = op("lab.events", "instances=0").infer_array_access(&query).await.unwrap();
        assert_eq!(lock.mode, LockMode::Exclusive);
        assert_eq!(lock.namespace, "lab");
        assert_eq!(lock.array, "events");
        assert_eq!(lock.query_id, query.query_id());
        assert_eq!(query.held_locks().len(), 1);
    }

    #[tokio::test]
    async fn test_versioned_name_rejected() {
        let fx = fixture().await;
        let err = op("events@2", "instances=0").infer_array_access(&query(&fx)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolInvariantViolation);
    }

    #[tokio::test]
    async fn test_malformed_name_rejected_before_lock() {
        let fx = fixture().await;
        for raw in ["", "lab.", ".events", "a.b/c", "a.b.c"] {
            let query = query(&fx);
            let err = op(raw, "instances=0").infer_array_access(&query).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolInvariantViolation, "{raw:?}: {err}");
            assert!(query.held_locks().is_empty(), "{raw:?}");
        }

        let query = query(&fx).with_namespace("a/b");
        let err = op("c", "instances=0").infer_array_access(&query).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolInvariantViolation);
        assert!(query.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_required_permissions() {
        let fx = fixture().await;
        let perms = op("lab.events", "instances=0").required_permissions(&query(&fx));
        assert_eq!(
            perms,
            vec![RequiredPermission {
                namespace: "lab".into(),
                permission: Permission::CreateArray,
            }]
        );
    }
}
