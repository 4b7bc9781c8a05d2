//! Named shared/exclusive locks owned by queries.
//!
//! Unlike a lease-based mutex, these locks never block: a request that
//! conflicts with a lock held by another query is denied immediately with
//! [`CoordinationError::LockHeld`]. Locks carry no TTL; they are released
//! by [`LockManager::release_query`] when the owning query ends.
//!
//! ## Lock State
//!
//! ```json
//! {
//!   "name": "public/events",
//!   "mode": "exclusive",
//!   "holders": [{"query_id": "...", "instance_id": 0}],
//!   "fencing_token": 3,
//!   "acquired_at_ms": 1700000000000
//! }
//! ```

use std::sync::Arc;

use residency_kv::KeyValueStore;
use residency_kv::KeyValueStoreError;
use residency_kv::ReadRequest;
use residency_kv::WriteRequest;
use tracing::debug;

use crate::error::CoordinationError;
use crate::pure::LockDecision;
use crate::pure::evaluate_lock_request;
use crate::pure::remove_holder;
use crate::retry::CasBackoff;
use crate::types::LockHolder;
use crate::types::LockMode;
use crate::types::LockState;
use crate::types::now_unix_ms;

const LOCK_PREFIX: &str = "__lock:";

/// A granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub name: String,
    /// Mode actually held after the request; may be stronger than requested.
    pub mode: LockMode,
    pub fencing_token: u64,
}

/// Manager for query-owned locks.
pub struct LockManager<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized + 'static> LockManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Try to take `name` in `mode` on behalf of `holder.query_id`.
    pub async fn try_acquire(
        &self,
        name: &str,
        holder: &LockHolder,
        mode: LockMode,
    ) -> Result<LockGrant, CoordinationError> {
        debug_assert!(!name.is_empty(), "LOCK: name must not be empty");
        debug_assert!(!holder.query_id.is_empty(), "LOCK: query_id must not be empty");

        let key = lock_key(name);
        let mut backoff = CasBackoff::new("lock acquire");
        loop {
            match self.try_acquire_once(&key, name, holder, mode).await {
                Err(CoordinationError::CasConflict) => backoff.wait().await?,
                other => return other,
            }
        }
    }

    async fn try_acquire_once(
        &self,
        key: &str,
        name: &str,
        holder: &LockHolder,
        mode: LockMode,
    ) -> Result<LockGrant, CoordinationError> {
        let current = self.read_state(key).await?;
        match evaluate_lock_request(current.as_ref(), name, holder, mode, now_unix_ms()) {
            LockDecision::AlreadyHeld(state) => Ok(grant_from(&state)),
            LockDecision::Deny { holder: blocker, mode } => Err(CoordinationError::LockHeld {
                name: name.to_string(),
                holder_query: blocker.query_id,
                mode,
            }),
            LockDecision::Grant(next) => {
                let expected = current.as_ref().map(serde_json::to_string).transpose()?;
                self.cas(key, expected, serde_json::to_string(&next)?).await?;
                debug!(name, query_id = %holder.query_id, mode = %next.mode, "lock granted");
                Ok(grant_from(&next))
            }
        }
    }

    /// Drop every hold `query_id` has on `name`. Returns whether anything was held.
    pub async fn release_query(&self, name: &str, query_id: &str) -> Result<bool, CoordinationError> {
        let key = lock_key(name);
        let mut backoff = CasBackoff::new("lock release");
        loop {
            match self.release_once(&key, query_id).await {
                Err(CoordinationError::CasConflict) => backoff.wait().await?,
                Ok(released) => {
                    if released {
                        debug!(name, query_id, "lock released");
                    }
                    return Ok(released);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn release_once(&self, key: &str, query_id: &str) -> Result<bool, CoordinationError> {
        let Some(state) = self.read_state(key).await? else {
            return Ok(false);
        };
        if !state.held_by(query_id) {
            return Ok(false);
        }

        let old_json = serde_json::to_string(&state)?;
        match remove_holder(&state, query_id) {
            None => {
                let result = self.store.write(WriteRequest::compare_and_delete(key, old_json)).await?;
                if result.succeeded != Some(true) {
                    return Err(CoordinationError::CasConflict);
                }
            }
            Some(next) => self.cas(key, Some(old_json), serde_json::to_string(&next)?).await?,
        }
        Ok(true)
    }

    /// Current lock state, or `None` if nobody holds it.
    pub async fn status(&self, name: &str) -> Result<Option<LockState>, CoordinationError> {
        self.read_state(&lock_key(name)).await
    }

    async fn read_state(&self, key: &str) -> Result<Option<LockState>, CoordinationError> {
        match self.store.read(ReadRequest::new(key)).await {
            Ok(result) => match result.kv {
                Some(kv) if !kv.value.is_empty() => {
                    serde_json::from_str(&kv.value).map(Some).map_err(|e| CoordinationError::CorruptedData {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
                }
                _ => Ok(None),
            },
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn cas(&self, key: &str, expected: Option<String>, new_value: String) -> Result<(), CoordinationError> {
        match self.store.write(WriteRequest::compare_and_swap(key, expected, new_value)).await {
            Ok(_) => Ok(()),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Err(CoordinationError::CasConflict),
            Err(e) => Err(e.into()),
        }
    }
}

fn grant_from(state: &LockState) -> LockGrant {
    LockGrant {
        name: state.name.clone(),
        mode: state.mode,
        fencing_token: state.fencing_token,
    }
}

fn lock_key(name: &str) -> String {
    format!("{LOCK_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use residency_kv::DeterministicKeyValueStore;

    use super::*;

    fn holder(query: &str, instance_id: u64) -> LockHolder {
        LockHolder {
            query_id: query.to_string(),
            instance_id,
        }
    }

    #[tokio::test]
    async fn exclusive_acquire_and_release() {
        let manager = LockManager::new(DeterministicKeyValueStore::new());

        let grant = manager.try_acquire("public/a", &holder("q1", 0), LockMode::Exclusive).await.unwrap();
        assert_eq!(grant.mode, LockMode::Exclusive);
        assert_eq!(grant.fencing_token, 1);

        assert!(manager.release_query("public/a", "q1").await.unwrap());
        assert!(manager.status("public/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_query_is_denied() {
        let manager = LockManager::new(DeterministicKeyValueStore::new());
        manager.try_acquire("public/a", &holder("q1", 0), LockMode::Exclusive).await.unwrap();

        let err = manager.try_acquire("public/a", &holder("q2", 1), LockMode::Exclusive).await.unwrap_err();
        match err {
            CoordinationError::LockHeld { holder_query, mode, .. } => {
                assert_eq!(holder_query, "q1");
                assert_eq!(mode, LockMode::Exclusive);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn lock_is_free_again_after_release() {
        let manager = LockManager::new(DeterministicKeyValueStore::new());
        manager.try_acquire("public/a", &holder("q1", 0), LockMode::Exclusive).await.unwrap();
        manager.release_query("public/a", "q1").await.unwrap();

        let grant = manager.try_acquire("public/a", &holder("q2", 0), LockMode::Exclusive).await.unwrap();
        assert_eq!(grant.mode, LockMode::Exclusive);
    }

    #[tokio::test]
    async fn different_names_do_not_conflict() {
        let manager = LockManager::new(DeterministicKeyValueStore::new());
        manager.try_acquire("public/a", &holder("q1", 0), LockMode::Exclusive).await.unwrap();
        manager.try_acquire("public/b", &holder("q2", 0), LockMode::Exclusive).await.unwrap();
    }

    #[tokio::test]
    async fn release_by_non_holder_is_noop() {
        let manager = LockManager::new(DeterministicKeyValueStore::new());
        manager.try_acquire("public/a", &holder("q1", 0), LockMode::Exclusive).await.unwrap();
        assert!(!manager.release_query("public/a", "q2").await.unwrap());
        assert!(manager.status("public/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_exclusive_requests_grant_exactly_one() {
        let store = DeterministicKeyValueStore::new();
        let mut handles = Vec::new();
        for i in 0..8u64 {
            let manager = LockManager::new(store.clone());
            handles.push(tokio::spawn(async move {
                manager.try_acquire("public/a", &holder(&format!("q{i}"), i), LockMode::Exclusive).await
            }));
        }

        let mut granted = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(CoordinationError::LockHeld { .. }) => denied += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(denied, 7);
    }
}
