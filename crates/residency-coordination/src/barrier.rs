//! Distributed barrier for coordinating multiple participants.
//!
//! A barrier lets N participants wait until all have arrived before any of
//! them proceeds. Because the barrier state lives in the same linearizable
//! store as everything else, any write a participant completes before
//! entering is visible to every participant once the barrier is released.
//!
//! A participant that cannot reach the barrier (for example a coordinator
//! whose commit failed) calls [`BarrierManager::abort`]; everyone waiting
//! then fails with [`CoordinationError::BarrierAborted`] instead of blocking.
//!
//! The barrier is stored as a JSON object in the key-value store.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use residency_kv::DeleteRequest;
use residency_kv::KeyValueStore;
use residency_kv::KeyValueStoreError;
use residency_kv::ReadRequest;
use residency_kv::WriteRequest;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::constants::DEFAULT_BARRIER_POLL_INTERVAL_MS;
use crate::constants::MAX_BARRIER_PARTICIPANTS;
use crate::error::CoordinationError;
use crate::pure;
use crate::types::now_unix_ms;

/// Barrier key prefix.
const BARRIER_PREFIX: &str = "__barrier:";

/// Barrier state stored in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierState {
    /// Barrier name.
    pub name: String,
    /// Number of participants required.
    pub required_count: u32,
    /// Participants that have entered, in arrival order.
    pub participants: Vec<String>,
    /// Current phase.
    pub phase: BarrierPhase,
    /// Why the barrier was aborted, if it was.
    pub abort_reason: Option<String>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u64,
}

/// Barrier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierPhase {
    /// Waiting for participants to enter.
    Waiting,
    /// All participants have arrived.
    Ready,
    /// A participant gave up; nobody may pass.
    Aborted,
}

impl BarrierPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrierPhase::Waiting => "waiting",
            BarrierPhase::Ready => "ready",
            BarrierPhase::Aborted => "aborted",
        }
    }
}

/// Snapshot of a barrier returned by [`BarrierManager::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierStatus {
    pub current_count: u32,
    pub required_count: u32,
    pub phase: Option<BarrierPhase>,
}

/// Manager for distributed barrier operations.
pub struct BarrierManager<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    poll_interval: Duration,
}

impl<S: KeyValueStore + ?Sized + 'static> BarrierManager<S> {
    /// Create a new barrier manager.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            poll_interval: Duration::from_millis(DEFAULT_BARRIER_POLL_INTERVAL_MS),
        }
    }

    /// Override how often a waiting participant re-reads the barrier state.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        debug_assert!(!poll_interval.is_zero(), "BARRIER: poll interval must be positive");
        self.poll_interval = poll_interval;
        self
    }

    /// Enter a barrier, waiting until all participants arrive.
    ///
    /// Entering twice with the same `participant_id` is idempotent. Returns
    /// the participant count observed when the barrier was released.
    pub async fn enter(
        &self,
        name: &str,
        participant_id: &str,
        required_count: u32,
        timeout: Option<Duration>,
    ) -> Result<u32, CoordinationError> {
        debug_assert!(!name.is_empty(), "BARRIER: name must not be empty");
        debug_assert!(!participant_id.is_empty(), "BARRIER: participant_id must not be empty");
        debug_assert!(required_count <= MAX_BARRIER_PARTICIPANTS, "BARRIER: required_count exceeds maximum");

        let key = barrier_key(name);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(d) = deadline
                && Instant::now() >= d
            {
                return Err(CoordinationError::Timeout {
                    operation: format!("barrier '{name}' enter"),
                });
            }

            let current = self.read_state(&key).await?;

            match current {
                None => {
                    let phase = pure::compute_initial_barrier_phase(required_count);
                    let state = BarrierState {
                        name: name.to_string(),
                        required_count,
                        participants: vec![participant_id.to_string()],
                        phase,
                        abort_reason: None,
                        created_at_ms: now_unix_ms(),
                    };
                    if self.cas_write(&key, None, &state).await? {
                        debug!(name, participant_id, "barrier created, first participant");
                        if phase == BarrierPhase::Ready {
                            return Ok(1);
                        }
                    } else {
                        continue;
                    }
                }
                Some(state) => {
                    if state.phase == BarrierPhase::Aborted {
                        return Err(CoordinationError::BarrierAborted {
                            name: name.to_string(),
                            reason: state.abort_reason.unwrap_or_default(),
                        });
                    }

                    let count = state.participants.len() as u32;
                    if state.participants.iter().any(|p| p == participant_id) {
                        if pure::is_barrier_ready(state.phase, count, state.required_count) {
                            return Ok(count);
                        }
                    } else {
                        if count >= state.required_count {
                            return Err(CoordinationError::BarrierFull {
                                name: name.to_string(),
                                required: state.required_count,
                            });
                        }

                        let mut next = state.clone();
                        next.participants.push(participant_id.to_string());
                        let count = next.participants.len() as u32;
                        if pure::should_transition_to_ready(count, next.required_count) {
                            next.phase = BarrierPhase::Ready;
                        }

                        if !self.cas_write(&key, Some(&state), &next).await? {
                            continue;
                        }
                        debug!(name, participant_id, count, required = next.required_count, "joined barrier");
                        if next.phase == BarrierPhase::Ready {
                            return Ok(count);
                        }
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Abort a barrier so that no participant can pass it.
    ///
    /// Creates the barrier in the aborted phase if nobody has entered yet.
    /// Aborting a barrier that was already released has no effect on the
    /// participants that passed it and returns `Ok(false)`.
    pub async fn abort(&self, name: &str, reason: &str) -> Result<bool, CoordinationError> {
        let key = barrier_key(name);
        loop {
            let current = self.read_state(&key).await?;
            let next = match &current {
                None => BarrierState {
                    name: name.to_string(),
                    required_count: 0,
                    participants: Vec::new(),
                    phase: BarrierPhase::Aborted,
                    abort_reason: Some(reason.to_string()),
                    created_at_ms: now_unix_ms(),
                },
                Some(state) if state.phase == BarrierPhase::Ready => {
                    warn!(name, reason, "abort requested on released barrier");
                    return Ok(false);
                }
                Some(state) if state.phase == BarrierPhase::Aborted => return Ok(true),
                Some(state) => BarrierState {
                    phase: BarrierPhase::Aborted,
                    abort_reason: Some(reason.to_string()),
                    ..state.clone()
                },
            };

            if self.cas_write(&key, current.as_ref(), &next).await? {
                debug!(name, reason, "barrier aborted");
                return Ok(true);
            }
        }
    }

    /// Get barrier status without modifying it.
    pub async fn status(&self, name: &str) -> Result<BarrierStatus, CoordinationError> {
        let key = barrier_key(name);
        Ok(match self.read_state(&key).await? {
            Some(state) => BarrierStatus {
                current_count: state.participants.len() as u32,
                required_count: state.required_count,
                phase: Some(state.phase),
            },
            None => BarrierStatus {
                current_count: 0,
                required_count: 0,
                phase: None,
            },
        })
    }

    /// Remove a barrier's state. Only safe once every participant has passed.
    pub async fn clear(&self, name: &str) -> Result<(), CoordinationError> {
        let key = barrier_key(name);
        self.store.delete(DeleteRequest::new(key)).await?;
        Ok(())
    }

    async fn read_state(&self, key: &str) -> Result<Option<BarrierState>, CoordinationError> {
        match self.store.read(ReadRequest::new(key)).await {
            Ok(result) => match result.kv {
                Some(kv) if !kv.value.is_empty() => {
                    let state = serde_json::from_str(&kv.value).map_err(|e| CoordinationError::CorruptedData {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                    Ok(Some(state))
                }
                _ => Ok(None),
            },
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `false` when the CAS lost a race and the caller should re-read.
    async fn cas_write(
        &self,
        key: &str,
        expected: Option<&BarrierState>,
        next: &BarrierState,
    ) -> Result<bool, CoordinationError> {
        let expected = expected.map(serde_json::to_string).transpose()?;
        let new_value = serde_json::to_string(next)?;
        match self.store.write(WriteRequest::compare_and_swap(key, expected, new_value)).await {
            Ok(_) => Ok(true),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn barrier_key(name: &str) -> String {
    format!("{BARRIER_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use residency_kv::DeterministicKeyValueStore;

    use super::*;

    fn manager(store: Arc<DeterministicKeyValueStore>) -> BarrierManager<DeterministicKeyValueStore> {
        BarrierManager::new(store).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn single_participant_passes_immediately() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);

        let count = barrier.enter("b", "p1", 1, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(count, 1);

        let status = barrier.status("b").await.unwrap();
        assert_eq!(status.phase, Some(BarrierPhase::Ready));
    }

    #[tokio::test]
    async fn status_of_missing_barrier() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);
        let status = barrier.status("none").await.unwrap();
        assert_eq!(status, BarrierStatus {
            current_count: 0,
            required_count: 0,
            phase: None,
        });
    }

    #[tokio::test]
    async fn lone_participant_times_out() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);

        let err = barrier.enter("b", "p1", 3, Some(Duration::from_millis(30))).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));

        let status = barrier.status("b").await.unwrap();
        assert_eq!(status.current_count, 1);
        assert_eq!(status.required_count, 3);
        assert_eq!(status.phase, Some(BarrierPhase::Waiting));
    }

    #[tokio::test]
    async fn releases_all_participants_together() {
        let store = DeterministicKeyValueStore::new();
        let mut handles = Vec::new();
        for i in 0..3 {
            let barrier = manager(store.clone());
            handles.push(tokio::spawn(async move {
                barrier.enter("b", &format!("p{i}"), 3, Some(Duration::from_secs(5))).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn abort_fails_waiting_participants() {
        let store = DeterministicKeyValueStore::new();
        let waiter = manager(store.clone());
        let handle = tokio::spawn(async move { waiter.enter("b", "p1", 2, Some(Duration::from_secs(5))).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager(store.clone()).abort("b", "commit failed").await.unwrap());

        let err = handle.await.unwrap().unwrap_err();
        match err {
            CoordinationError::BarrierAborted { name, reason } => {
                assert_eq!(name, "b");
                assert_eq!(reason, "commit failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn abort_before_anyone_enters() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);
        assert!(barrier.abort("b", "gone").await.unwrap());
        let err = barrier.enter("b", "p1", 2, None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::BarrierAborted { .. }));
    }

    #[tokio::test]
    async fn abort_after_release_is_ignored() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);
        barrier.enter("b", "p1", 1, None).await.unwrap();
        assert!(!barrier.abort("b", "late").await.unwrap());
        assert_eq!(barrier.status("b").await.unwrap().phase, Some(BarrierPhase::Ready));
    }

    #[tokio::test]
    async fn extra_participant_is_rejected() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store);
        barrier.enter("b", "p1", 1, None).await.unwrap();
        let err = barrier.enter("b", "p2", 1, None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::BarrierFull { required: 1, .. }));
    }

    #[tokio::test]
    async fn clear_removes_state() {
        let store = DeterministicKeyValueStore::new();
        let barrier = manager(store.clone());
        barrier.enter("b", "p1", 1, None).await.unwrap();
        barrier.clear("b").await.unwrap();
        assert!(store.is_empty().await);
    }
}
