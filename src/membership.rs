//! Cluster membership seam and snapshot capture.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::ResidencyError;
use crate::residency::InstanceInfo;
use crate::residency::MembershipSnapshot;
use crate::types::InstanceId;

/// Liveness and identity as seen from one instance.
pub trait ClusterMembership: Send + Sync {
    fn is_instance_alive(&self, instance_id: InstanceId) -> bool;

    fn local_instance_id(&self) -> InstanceId;
}

/// Shared liveness table for an in-process cluster.
///
/// Clones share the same table, so marking an instance dead is observed by
/// every node built from it.
#[derive(Debug, Clone, Default)]
pub struct LivenessView {
    alive: Arc<RwLock<BTreeSet<InstanceId>>>,
}

impl LivenessView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_alive(&self, instance_id: InstanceId) {
        self.alive.write().insert(instance_id);
    }

    pub fn mark_dead(&self, instance_id: InstanceId) {
        self.alive.write().remove(&instance_id);
    }

    pub fn is_alive(&self, instance_id: InstanceId) -> bool {
        self.alive.read().contains(&instance_id)
    }

    pub fn alive_instances(&self) -> Vec<InstanceId> {
        self.alive.read().iter().copied().collect()
    }

    /// Membership handle for one instance.
    pub fn for_instance(&self, local: InstanceId) -> NodeMembership {
        NodeMembership {
            local,
            liveness: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeMembership {
    local: InstanceId,
    liveness: LivenessView,
}

impl ClusterMembership for NodeMembership {
    fn is_instance_alive(&self, instance_id: InstanceId) -> bool {
        self.liveness.is_alive(instance_id)
    }

    fn local_instance_id(&self) -> InstanceId {
        self.local
    }
}

/// Combine the catalog's instance list with current liveness.
///
/// The result is the one snapshot used for a whole validation; it is not
/// refreshed afterwards.
pub async fn capture_snapshot(
    catalog: &dyn Catalog,
    membership: &dyn ClusterMembership,
) -> Result<MembershipSnapshot, ResidencyError> {
    let records = catalog
        .get_instances()
        .await
        .map_err(|source| ResidencyError::Catalog {
            operation: "get_instances",
            source,
        })?;

    let snapshot: MembershipSnapshot = records
        .into_iter()
        .map(|record| {
            let info = InstanceInfo {
                server_id: record.server_id,
                alive: membership.is_instance_alive(record.instance_id),
            };
            (record.instance_id, info)
        })
        .collect();

    debug!(
        local = %membership.local_instance_id(),
        alive = snapshot.alive_instances().count(),
        "captured membership snapshot"
    );
    Ok(snapshot)
}
