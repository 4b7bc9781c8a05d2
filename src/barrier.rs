//! Query-scoped synchronization barrier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use residency_coordination::BarrierManager;
use residency_coordination::CoordinationError;
use residency_kv::KeyValueStore;

use crate::types::InstanceId;
use crate::types::QueryId;

/// Rendezvous for all instances taking part in one query step.
#[async_trait]
pub trait QueryBarrier: Send + Sync {
    /// Wait until `participant_count` instances have reached `step` of `query_id`.
    async fn sync(
        &self,
        query_id: QueryId,
        step: u32,
        participant: InstanceId,
        participant_count: u32,
    ) -> Result<(), CoordinationError>;

    /// Fail every current and future waiter of `step`.
    async fn abort(&self, query_id: QueryId, step: u32, reason: &str) -> Result<(), CoordinationError>;

    /// Drop barrier state once the query has finished.
    async fn clear(&self, query_id: QueryId, step: u32) -> Result<(), CoordinationError>;
}

/// [`QueryBarrier`] backed by a [`BarrierManager`] over the shared store.
pub struct KvQueryBarrier {
    manager: BarrierManager<dyn KeyValueStore>,
    timeout: Option<Duration>,
}

impl KvQueryBarrier {
    pub fn new(store: Arc<dyn KeyValueStore>, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            manager: BarrierManager::new(store).with_poll_interval(poll_interval),
            timeout,
        }
    }
}

/// Store-level name of the barrier for `step` of `query_id`.
pub fn barrier_name(query_id: QueryId, step: u32) -> String {
    format!("{query_id}/step/{step}")
}

#[async_trait]
impl QueryBarrier for KvQueryBarrier {
    async fn sync(
        &self,
        query_id: QueryId,
        step: u32,
        participant: InstanceId,
        participant_count: u32,
    ) -> Result<(), CoordinationError> {
        self.manager
            .enter(
                &barrier_name(query_id, step),
                &participant.to_string(),
                participant_count,
                self.timeout,
            )
            .await?;
        Ok(())
    }

    async fn abort(&self, query_id: QueryId, step: u32, reason: &str) -> Result<(), CoordinationError> {
        self.manager.abort(&barrier_name(query_id, step), reason).await?;
        Ok(())
    }

    async fn clear(&self, query_id: QueryId, step: u32) -> Result<(), CoordinationError> {
        self.manager.clear(&barrier_name(query_id, step)).await
    }
}

#[cfg(test)]
mod tests {
    use residency_kv::DeterministicKeyValueStore;

    use super::*;

    fn barrier(timeout: Option<Duration>) -> Arc<KvQueryBarrier> {
        Arc::new(KvQueryBarrier::new(
            DeterministicKeyValueStore::new(),
            Duration::from_millis(5),
            timeout,
        ))
    }

    #[tokio::test]
    async fn test_two_participants() {
        let barrier = barrier(Some(Duration::from_secs(5)));
        let query = QueryId::new();

        let other = Arc::clone(&barrier);
        let handle = tokio::spawn(async move { other.sync(query, 0, InstanceId(1), 2).await });

        barrier.sync(query, 0, InstanceId(0), 2).await.unwrap();
        handle.await.unwrap().unwrap();
        barrier.clear(query, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_fails_waiter() {
        let barrier = barrier(Some(Duration::from_secs(5)));
        let query = QueryId::new();

        barrier.abort(query, 0, "commit failed").await.unwrap();
        let err = barrier.sync(query, 0, InstanceId(1), 2).await.unwrap_err();
        assert!(matches!(err, CoordinationError::BarrierAborted { .. }));
    }

    #[tokio::test]
    async fn test_steps_are_independent() {
        let barrier = barrier(Some(Duration::from_millis(50)));
        let query = QueryId::new();

        barrier.sync(query, 1, InstanceId(0), 1).await.unwrap();
        let err = barrier.sync(query, 2, InstanceId(0), 2).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));
    }
}
