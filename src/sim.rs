//! In-process cluster: every instance runs as a tokio task over one shared
//! [`DeterministicKeyValueStore`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use residency_kv::DeterministicKeyValueStore;
use residency_kv::KeyValueStore;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;

use crate::barrier::KvQueryBarrier;
use crate::catalog::Catalog;
use crate::catalog::InstanceRecord;
use crate::catalog::KvCatalog;
use crate::config::ResidencyConfig;
use crate::error::ResidencyError;
use crate::lock::KvLockService;
use crate::membership::LivenessView;
use crate::operator::CREATE_BARRIER_STEP;
use crate::operator::CreateArrayRequest;
use crate::operator::CreateOutcome;
use crate::operator::CreateWithResidency;
use crate::operator::PhysicalCreateWithResidency;
use crate::query::NodeServices;
use crate::query::QueryContext;
use crate::transient::TransientRegistry;
use crate::types::InstanceId;
use crate::types::QueryId;
use crate::types::ServerId;

/// A statement that passed lock acquisition and schema inference on its
/// coordinator and is ready to run on every participant.
pub struct PreparedCreate {
    coordinator: Arc<QueryContext>,
    physical: Arc<PhysicalCreateWithResidency>,
}

impl PreparedCreate {
    pub fn query_id(&self) -> QueryId {
        self.coordinator.query_id()
    }

    pub fn coordinator(&self) -> &QueryContext {
        &self.coordinator
    }

    pub fn physical(&self) -> &PhysicalCreateWithResidency {
        &self.physical
    }
}

impl fmt::Debug for PreparedCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCreate")
            .field("query_id", &self.coordinator.query_id())
            .field("coordinator", &self.coordinator.local_instance())
            .field("participants", &self.coordinator.participants())
            .field("physical", &self.physical)
            .finish()
    }
}

pub struct SimCluster {
    store: Arc<DeterministicKeyValueStore>,
    liveness: LivenessView,
    config: Arc<ResidencyConfig>,
    nodes: BTreeMap<InstanceId, NodeServices>,
}

impl SimCluster {
    /// Register every instance in the catalog and mark it alive.
    pub async fn start(topology: &[(InstanceId, ServerId)], config: ResidencyConfig) -> Result<Self, ResidencyError> {
        let store = DeterministicKeyValueStore::new();
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let config = Arc::new(config);
        let liveness = LivenessView::new();

        let registrar = KvCatalog::new(Arc::clone(&shared), config.id_batch_size);
        let mut nodes = BTreeMap::new();
        for &(instance_id, server_id) in topology {
            registrar
                .register_instance(InstanceRecord { instance_id, server_id })
                .await
                .map_err(|source| ResidencyError::Catalog {
                    operation: "register_instance",
                    source,
                })?;
            liveness.mark_alive(instance_id);

            let services = NodeServices {
                catalog: Arc::new(KvCatalog::new(Arc::clone(&shared), config.id_batch_size)),
                membership: Arc::new(liveness.for_instance(instance_id)),
                locks: Arc::new(KvLockService::new(Arc::clone(&shared))),
                barrier: Arc::new(KvQueryBarrier::new(
                    Arc::clone(&shared),
                    config.barrier_poll_interval(),
                    config.barrier_timeout(),
                )),
                transient: Arc::new(TransientRegistry::new()),
                config: Arc::clone(&config),
            };
            nodes.insert(instance_id, services);
        }

        info!(instances = nodes.len(), "simulated cluster started");
        Ok(Self {
            store,
            liveness,
            config,
            nodes,
        })
    }

    /// `instances` instances spread round-robin over `servers` servers.
    pub async fn with_layout(instances: u64, servers: u64, config: ResidencyConfig) -> Result<Self, ResidencyError> {
        if servers == 0 {
            return Err(ResidencyError::ProtocolInvariantViolation {
                context: format!("cannot place {instances} instances on zero servers"),
            });
        }
        let topology: Vec<(InstanceId, ServerId)> =
            (0..instances).map(|id| (InstanceId(id), ServerId(id % servers))).collect();
        Self::start(&topology, config).await
    }

    pub fn store(&self) -> &Arc<DeterministicKeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &ResidencyConfig {
        &self.config
    }

    pub fn node(&self, instance_id: InstanceId) -> Option<&NodeServices> {
        self.nodes.get(&instance_id)
    }

    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.nodes.keys().copied()
    }

    /// Swap the catalog one instance uses, e.g. for a wrapper that injects
    /// delays or failures.
    pub fn set_catalog(&mut self, instance_id: InstanceId, catalog: Arc<dyn Catalog>) {
        if let Some(node) = self.nodes.get_mut(&instance_id) {
            node.catalog = catalog;
        }
    }

    pub fn set_alive(&self, instance_id: InstanceId, alive: bool) {
        if alive {
            self.liveness.mark_alive(instance_id);
        } else {
            self.liveness.mark_dead(instance_id);
        }
    }

    /// Alive, registered instances; the lowest one coordinates.
    fn participants(&self) -> Vec<InstanceId> {
        self.instances().filter(|id| self.liveness.is_alive(*id)).collect()
    }

    fn context(
        &self,
        query_id: QueryId,
        instance_id: InstanceId,
        participants: &[InstanceId],
    ) -> Result<QueryContext, ResidencyError> {
        let coordinator = *participants.first().ok_or_else(|| ResidencyError::EmptyResidency {
            reason: "no live instances to run the query".into(),
        })?;
        let services = self
            .nodes
            .get(&instance_id)
            .ok_or_else(|| ResidencyError::ProtocolInvariantViolation {
                context: format!("instance {instance_id} is not part of the cluster"),
            })?
            .clone();
        QueryContext::new(query_id, coordinator, participants.to_vec(), services)
    }

    /// Lock the target name and infer the schema on the coordinator.
    ///
    /// On failure the coordinator's locks are released before returning.
    pub async fn prepare(&self, request: CreateArrayRequest) -> Result<PreparedCreate, ResidencyError> {
        let participants = self.participants();
        let query_id = QueryId::new();
        let coordinator_id = participants.first().copied().ok_or_else(|| ResidencyError::EmptyResidency {
            reason: "no live instances to run the query".into(),
        })?;
        let coordinator = self.context(query_id, coordinator_id, &participants)?;

        let logical = CreateWithResidency::new(request);
        let inferred = async {
            logical.infer_array_access(&coordinator).await?;
            logical.infer_schema(&coordinator).await
        }
        .await;

        match inferred {
            Ok(schema) => Ok(PreparedCreate {
                coordinator: Arc::new(coordinator),
                physical: Arc::new(logical.into_physical(schema)),
            }),
            Err(err) => {
                if let Err(release) = coordinator.finish().await {
                    warn!(query_id = %query_id, error = %release, "failed to release locks after inference error");
                }
                Err(err)
            }
        }
    }

    /// Run a prepared statement on every participant and end the query.
    ///
    /// Returns one outcome per participant in instance order, or the
    /// coordinator's error if it failed, otherwise the first worker error.
    /// The query's locks are released on every path.
    pub async fn execute(&self, prepared: PreparedCreate) -> Result<Vec<CreateOutcome>, ResidencyError> {
        let PreparedCreate { coordinator, physical } = prepared;
        let query_id = coordinator.query_id();
        let participants = coordinator.participants().to_vec();

        let mut queries = Vec::with_capacity(participants.len());
        for &instance_id in &participants {
            if instance_id == coordinator.local_instance() {
                queries.push((instance_id, Arc::clone(&coordinator)));
                continue;
            }
            match self.context(query_id, instance_id, &participants) {
                Ok(ctx) => queries.push((instance_id, Arc::new(ctx))),
                Err(err) => {
                    if let Err(release) = self.end_query(&coordinator).await {
                        warn!(query_id = %query_id, error = %release, "failed to end query after setup error");
                    }
                    return Err(err);
                }
            }
        }

        let mut tasks = JoinSet::new();
        for (instance_id, query) in queries {
            let physical = Arc::clone(&physical);
            tasks.spawn(async move { (instance_id, physical.execute(&query).await) });
        }

        let mut results = BTreeMap::new();
        let mut join_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((instance_id, result)) => {
                    results.insert(instance_id, result);
                }
                Err(e) if join_error.is_none() => {
                    warn!(query_id = %query_id, error = %e, "create task failed, cancelling the rest");
                    // Peers may be parked at the barrier waiting for the failed task.
                    tasks.abort_all();
                    join_error = Some(ResidencyError::ProtocolInvariantViolation {
                        context: format!("create task for query {query_id} failed: {e}"),
                    });
                }
                Err(_) => {}
            }
        }

        let finished = self.end_query(&coordinator).await;
        if let Some(err) = join_error {
            return Err(err);
        }

        let mut outcomes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (instance_id, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if instance_id == coordinator.local_instance() => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        finished?;
        Ok(outcomes)
    }

    /// Release the query's locks and drop its barrier state.
    async fn end_query(&self, coordinator: &QueryContext) -> Result<(), ResidencyError> {
        let query_id = coordinator.query_id();
        let finished = coordinator.finish().await;
        if let Some(node) = self.nodes.get(&coordinator.local_instance())
            && let Err(e) = node.barrier.clear(query_id, CREATE_BARRIER_STEP).await
        {
            warn!(query_id = %query_id, error = %e, "failed to clear create barrier");
        }
        finished
    }

    /// Prepare and execute one statement.
    pub async fn create_with_residency(&self, request: CreateArrayRequest) -> Result<Vec<CreateOutcome>, ResidencyError> {
        let prepared = self.prepare(request).await?;
        self.execute(prepared).await
    }
}
