//! Per-instance view of one running query.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use residency_coordination::CoordinationError;
use tracing::debug;
use tracing::warn;

use crate::barrier::QueryBarrier;
use crate::catalog::Catalog;
use crate::config::ResidencyConfig;
use crate::error::ResidencyError;
use crate::lock::LockDescriptor;
use crate::lock::LockService;
use crate::membership::ClusterMembership;
use crate::schema::split_qualified_name;
use crate::transient::TransientRegistry;
use crate::types::InstanceId;
use crate::types::QueryId;

/// Collaborators available to one instance.
#[derive(Clone)]
pub struct NodeServices {
    pub catalog: Arc<dyn Catalog>,
    pub membership: Arc<dyn ClusterMembership>,
    pub locks: Arc<dyn LockService>,
    pub barrier: Arc<dyn QueryBarrier>,
    pub transient: Arc<TransientRegistry>,
    pub config: Arc<ResidencyConfig>,
}

/// State of one query as seen by one participating instance.
///
/// Every participant holds its own `QueryContext` with the same query id,
/// coordinator and participant list.
pub struct QueryContext {
    query_id: QueryId,
    coordinator: InstanceId,
    participants: Vec<InstanceId>,
    current_namespace: String,
    auto_commit: AtomicBool,
    held_locks: Mutex<Vec<LockDescriptor>>,
    services: NodeServices,
}

impl QueryContext {
    /// Fails with [`ResidencyError::ProtocolInvariantViolation`] unless both
    /// the local instance and `coordinator` are in `participants`.
    pub fn new(
        query_id: QueryId,
        coordinator: InstanceId,
        participants: Vec<InstanceId>,
        services: NodeServices,
    ) -> Result<Self, ResidencyError> {
        let local = services.membership.local_instance_id();
        for (role, instance) in [("local instance", local), ("coordinator", coordinator)] {
            if !participants.contains(&instance) {
                return Err(ResidencyError::ProtocolInvariantViolation {
                    context: format!("{role} {instance} is not a participant of query {query_id}"),
                });
            }
        }

        Ok(Self {
            query_id,
            coordinator,
            participants,
            current_namespace: services.config.default_namespace.clone(),
            auto_commit: AtomicBool::new(false),
            held_locks: Mutex::new(Vec::new()),
            services,
        })
    }

    /// Override the namespace used for unqualified array names.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.current_namespace = namespace.into();
        self
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn local_instance(&self) -> InstanceId {
        self.services.membership.local_instance_id()
    }

    pub fn coordinator(&self) -> InstanceId {
        self.coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.local_instance() == self.coordinator
    }

    pub fn participants(&self) -> &[InstanceId] {
        &self.participants
    }

    pub fn services(&self) -> &NodeServices {
        &self.services
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.services.catalog.as_ref()
    }

    pub fn config(&self) -> &ResidencyConfig {
        &self.services.config
    }

    /// Resolve `ns.name` or a bare `name` against the query's namespace.
    pub fn namespace_and_array_name(&self, raw: &str) -> (String, String) {
        let (namespace, name) = split_qualified_name(raw, &self.current_namespace);
        (namespace.to_string(), name.to_string())
    }

    /// Commit the query's catalog changes without a separate commit step.
    pub fn set_auto_commit(&self) {
        self.auto_commit.store(true, Ordering::Release);
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    /// Request a lock on behalf of this query. Granted locks are released by
    /// [`finish`](Self::finish).
    pub async fn request_lock(&self, desc: &LockDescriptor) -> Result<LockDescriptor, CoordinationError> {
        let granted = self.services.locks.request_lock(desc).await?;
        let mut held = self.held_locks.lock();
        if !held.iter().any(|h| h.lock_name() == granted.lock_name()) {
            held.push(granted.clone());
        }
        Ok(granted)
    }

    pub fn held_locks(&self) -> Vec<LockDescriptor> {
        self.held_locks.lock().clone()
    }

    /// Block until every participant reaches `step`.
    pub async fn sync_barrier(&self, step: u32) -> Result<(), ResidencyError> {
        let count = u32::try_from(self.participants.len()).map_err(|_| ResidencyError::ProtocolInvariantViolation {
            context: format!("query {} has too many participants", self.query_id),
        })?;

        debug!(query_id = %self.query_id, instance = %self.local_instance(), step, count, "waiting at barrier");
        self.services
            .barrier
            .sync(self.query_id, step, self.local_instance(), count)
            .await
            .map_err(|source| ResidencyError::Coordination {
                operation: "barrier sync",
                source,
            })?;
        debug!(query_id = %self.query_id, instance = %self.local_instance(), step, "barrier released");
        Ok(())
    }

    /// Fail every participant waiting at `step`.
    pub async fn abort_barrier(&self, step: u32, reason: &str) -> Result<(), ResidencyError> {
        self.services
            .barrier
            .abort(self.query_id, step, reason)
            .await
            .map_err(|source| ResidencyError::Coordination {
                operation: "barrier abort",
                source,
            })
    }

    /// End the query on this instance, releasing every lock it took.
    ///
    /// Every lock is attempted even if an earlier release fails; the first
    /// failure is returned.
    pub async fn finish(&self) -> Result<(), ResidencyError> {
        let held = std::mem::take(&mut *self.held_locks.lock());
        let mut first_error = None;

        for desc in held {
            match self.services.locks.release_lock(&desc).await {
                Ok(released) => {
                    debug!(query_id = %self.query_id, lock = %desc.lock_name(), released, "lock released");
                }
                Err(source) => {
                    warn!(query_id = %self.query_id, lock = %desc.lock_name(), error = %source, "lock release failed");
                    first_error.get_or_insert(ResidencyError::Coordination {
                        operation: "lock release",
                        source,
                    });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
