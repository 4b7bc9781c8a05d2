//! Expansion and liveness validation of a [`ResidencySpec`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use super::parser::ResidencyMode;
use super::parser::ResidencySpec;
use super::set::ResidencySet;
use crate::error::ResidencyError;
use crate::types::InstanceId;
use crate::types::ServerId;

/// One instance as seen in a [`MembershipSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub server_id: ServerId,
    pub alive: bool,
}

/// Point-in-time view of cluster membership, captured once per validation.
///
/// Instances absent from the snapshot are treated as not alive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    instances: BTreeMap<InstanceId, InstanceInfo>,
}

impl MembershipSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance_id: InstanceId, server_id: ServerId, alive: bool) {
        self.instances.insert(instance_id, InstanceInfo { server_id, alive });
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<&InstanceInfo> {
        self.instances.get(&instance_id)
    }

    pub fn is_alive(&self, instance_id: InstanceId) -> bool {
        self.instances.get(&instance_id).is_some_and(|info| info.alive)
    }

    /// Instances in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &InstanceInfo)> {
        self.instances.iter().map(|(id, info)| (*id, info))
    }

    pub fn alive_instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.iter().filter(|(_, info)| info.alive).map(|(id, _)| id)
    }
}

impl FromIterator<(InstanceId, InstanceInfo)> for MembershipSnapshot {
    fn from_iter<I: IntoIterator<Item = (InstanceId, InstanceInfo)>>(iter: I) -> Self {
        Self {
            instances: iter.into_iter().collect(),
        }
    }
}

/// Resolve a parsed spec against a membership snapshot.
///
/// Instance mode checks each listed id for liveness. Server mode expands every
/// instance hosted on a listed server; a dead instance on a listed server is an
/// error rather than being skipped.
pub fn resolve(spec: &ResidencySpec, snapshot: &MembershipSnapshot) -> Result<ResidencySet, ResidencyError> {
    let mut resolved = Vec::with_capacity(spec.raw_tokens().len());

    match spec.mode() {
        ResidencyMode::InstanceList => {
            for &raw in spec.raw_tokens() {
                let instance_id = InstanceId(raw);
                if !snapshot.is_alive(instance_id) {
                    return Err(ResidencyError::DeadInstance { instance_id });
                }
                resolved.push(instance_id);
            }
            if resolved.is_empty() {
                return Err(ResidencyError::EmptyResidency {
                    reason: "no instances specified".into(),
                });
            }
        }
        ResidencyMode::ServerList => {
            for (instance_id, info) in snapshot.iter() {
                if !spec.raw_tokens().contains(&info.server_id.0) {
                    continue;
                }
                if !info.alive {
                    return Err(ResidencyError::DeadInstance { instance_id });
                }
                resolved.push(instance_id);
            }
            if resolved.is_empty() {
                return Err(ResidencyError::EmptyResidency {
                    reason: "no instances specified / invalid server id?".into(),
                });
            }
        }
    }

    ResidencySet::new(resolved)
}
