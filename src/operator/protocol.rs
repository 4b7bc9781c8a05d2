//! Execution-time create protocol, one state machine per participant.
//!
//! ```text
//! Start ──coordinator──▶ CoordinatorCommit ──temp──▶ WorkerWait ─▶ BarrierPassed ─▶ TransientRegister ─▶ Done
//!   │                          └──────!temp──────────────────────────────────────────────────────────▶ Done
//!   ├──worker, temp──▶ WorkerWait
//!   └──worker, !temp──▶ Done
//! ```
//!
//! The coordinator enters the barrier only after its catalog write has
//! returned, so no participant passes the barrier before the schema is
//! readable. A failed commit aborts the barrier instead.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::create::CreateArrayRequest;
use super::create::ensure_array_absent;
use crate::catalog::ArrayVersion;
use crate::catalog::CatalogError;
use crate::error::ResidencyError;
use crate::query::QueryContext;
use crate::schema::ArraySchema;
use crate::schema::Distribution;
use crate::schema::is_name_versioned;
use crate::schema::validate_array_name;
use crate::transient::MemArray;
use crate::transient::TransientKey;
use crate::types::InstanceId;

/// Barrier step used by array creation.
pub const CREATE_BARRIER_STEP: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Start,
    /// Coordinator only: allocate the id and write the schema.
    CoordinatorCommit,
    /// Waiting at the creation barrier. The coordinator enters it too once
    /// its commit has returned.
    WorkerWait,
    BarrierPassed,
    TransientRegister,
    Done,
}

/// Successor of `state`, or `None` once the protocol is done.
pub fn next_state(state: ProtocolState, is_coordinator: bool, temp: bool) -> Option<ProtocolState> {
    use ProtocolState::*;

    Some(match state {
        Start if is_coordinator => CoordinatorCommit,
        Start if temp => WorkerWait,
        Start => Done,
        CoordinatorCommit if temp => WorkerWait,
        CoordinatorCommit => Done,
        WorkerWait => BarrierPassed,
        BarrierPassed if temp => TransientRegister,
        BarrierPassed => Done,
        TransientRegister => Done,
        Done => return None,
    })
}

/// What one participant did while executing the protocol.
///
/// The operator yields no array to the client; this record exists for
/// callers that want to inspect the side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub instance: InstanceId,
    /// Every state visited, in order, ending with `Done`.
    pub states: Vec<ProtocolState>,
    /// Schema written to the catalog. Coordinator only.
    pub committed: Option<ArraySchema>,
    /// Local transient registration. Transient arrays only.
    pub registered: Option<TransientKey>,
    /// Whether this instance marked the query for automatic commit.
    pub auto_commit: bool,
}

/// Physical `create_with_residency` operator.
#[derive(Debug, Clone)]
pub struct PhysicalCreateWithResidency {
    request: CreateArrayRequest,
    schema: ArraySchema,
}

impl PhysicalCreateWithResidency {
    pub fn new(request: CreateArrayRequest, schema: ArraySchema) -> Self {
        Self { request, schema }
    }

    /// Draft schema produced by inference.
    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    pub fn request(&self) -> &CreateArrayRequest {
        &self.request
    }

    pub async fn execute(&self, query: &QueryContext) -> Result<CreateOutcome, ResidencyError> {
        let temp = self.request.temp;
        let is_coordinator = query.is_coordinator();
        let mut outcome = CreateOutcome {
            instance: query.local_instance(),
            states: Vec::new(),
            committed: None,
            registered: None,
            auto_commit: false,
        };

        let mut state = ProtocolState::Start;
        loop {
            outcome.states.push(state);
            match state {
                ProtocolState::CoordinatorCommit => match self.commit(query).await {
                    Ok(schema) => outcome.committed = Some(schema),
                    Err(err) => {
                        if temp {
                            self.abort_waiters(query, &err).await;
                        }
                        return Err(err);
                    }
                },
                ProtocolState::WorkerWait => query.sync_barrier(CREATE_BARRIER_STEP).await?,
                ProtocolState::TransientRegister => outcome.registered = Some(self.register_transient(query).await?),
                ProtocolState::Start | ProtocolState::BarrierPassed | ProtocolState::Done => {}
            }

            match next_state(state, is_coordinator, temp) {
                Some(next) => {
                    debug!(
                        query_id = %query.query_id(),
                        instance = %query.local_instance(),
                        from = ?state,
                        to = ?next,
                        "create protocol transition"
                    );
                    state = next;
                }
                None => break,
            }
        }

        outcome.auto_commit = query.is_auto_commit();
        Ok(outcome)
    }

    async fn commit(&self, query: &QueryContext) -> Result<ArraySchema, ResidencyError> {
        let (namespace, name) = query.namespace_and_array_name(&self.request.array_name);
        if is_name_versioned(&name) {
            error!(query_id = %query.query_id(), %namespace, array = %name, "commit requested for versioned name");
            return Err(ResidencyError::ProtocolInvariantViolation {
                context: format!("array name '{name}' must be unversioned at commit"),
            });
        }
        if let Err(reason) = validate_array_name(&namespace, &name) {
            error!(query_id = %query.query_id(), %namespace, array = %name, %reason, "commit requested for malformed name");
            return Err(ResidencyError::ProtocolInvariantViolation {
                context: format!("cannot commit array '{namespace}.{name}': {reason}"),
            });
        }

        let catalog = query.catalog();
        ensure_array_absent(catalog, &namespace, &name).await?;

        let mut schema = self.schema.clone();
        schema.namespace = namespace;
        schema.name = name;
        schema.transient = self.request.temp;
        schema.distribution = Distribution::default_partitioning(query.config().redundancy);

        let array_id = catalog.next_array_id().await.map_err(|source| ResidencyError::Catalog {
            operation: "next_array_id",
            source,
        })?;
        schema.finalize(array_id);

        if !schema.transient {
            query.set_auto_commit();
        }

        catalog.add_array(&schema).await.map_err(|source| match source {
            CatalogError::ArrayAlreadyExists { .. } => ResidencyError::CatalogConflict {
                namespace: schema.namespace.clone(),
                array: schema.name.clone(),
                source,
            },
            source => ResidencyError::Catalog {
                operation: "add_array",
                source,
            },
        })?;

        info!(
            query_id = %query.query_id(),
            namespace = %schema.namespace,
            array = %schema.name,
            array_id = %array_id,
            residency = %schema.residency,
            transient = schema.transient,
            "array committed to catalog"
        );
        Ok(schema)
    }

    async fn abort_waiters(&self, query: &QueryContext, cause: &ResidencyError) {
        if let Err(e) = query.abort_barrier(CREATE_BARRIER_STEP, &cause.to_string()).await {
            warn!(query_id = %query.query_id(), error = %e, "failed to abort create barrier");
        }
    }

    /// Re-read the committed schema by name and register a fresh in-memory
    /// array for it in this process.
    async fn register_transient(&self, query: &QueryContext) -> Result<TransientKey, ResidencyError> {
        let (namespace, name) = query.namespace_and_array_name(&self.request.array_name);
        let schema = query
            .catalog()
            .get_array_desc(&namespace, &name, ArrayVersion::Any)
            .await
            .map_err(|source| ResidencyError::Catalog {
                operation: "get_array_desc",
                source,
            })?;

        if !schema.transient {
            error!(query_id = %query.query_id(), %namespace, array = %name, "committed schema is not transient");
            return Err(ResidencyError::ProtocolInvariantViolation {
                context: format!("schema for {namespace}.{name} read after barrier is not transient"),
            });
        }

        let array = query.services().transient.record(MemArray::new(schema, query.query_id()));
        Ok(TransientKey::for_schema(array.schema()))
    }
}

#[cfg(test)]
mod tests {
    use super::ProtocolState::*;
    use super::*;

    fn walk(is_coordinator: bool, temp: bool) -> Vec<ProtocolState> {
        let mut states = vec![Start];
        let mut state = Start;
        while let Some(next) = next_state(state, is_coordinator, temp) {
            states.push(next);
            state = next;
        }
        states
    }

    #[test]
    fn test_coordinator_transient() {
        assert_eq!(
            walk(true, true),
            vec![Start, CoordinatorCommit, WorkerWait, BarrierPassed, TransientRegister, Done]
        );
    }

    #[test]
    fn test_worker_transient() {
        assert_eq!(walk(false, true), vec![Start, WorkerWait, BarrierPassed, TransientRegister, Done]);
    }

    #[test]
    fn test_coordinator_persistent() {
        assert_eq!(walk(true, false), vec![Start, CoordinatorCommit, Done]);
    }

    #[test]
    fn test_worker_persistent() {
        assert_eq!(walk(false, false), vec![Start, Done]);
    }

    #[test]
    fn test_done_is_terminal() {
        for (c, t) in [(true, true), (true, false), (false, true), (false, false)] {
            assert_eq!(next_state(Done, c, t), None);
        }
    }
}
