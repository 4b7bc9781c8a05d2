//! Distributed sequence number generator.
//!
//! Generates globally unique, monotonically increasing IDs. Each generator
//! reserves a batch of IDs from the store with compare-and-swap and hands
//! them out locally until the batch runs out.
//!
//! Properties:
//!
//! 1. **Uniqueness**: no two `next()` calls, on any instance, return the same value
//! 2. **Monotonicity**: per generator, each value is greater than the previous
//! 3. **Batch disjointness**: reservations return non-overlapping ranges
//! 4. **Overflow safety**: operations fail before overflow

use std::sync::Arc;

use residency_kv::KeyValueStore;
use residency_kv::KeyValueStoreError;
use residency_kv::ReadRequest;
use residency_kv::WriteRequest;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoordinationError;
use crate::retry::CasBackoff;

/// Configuration for sequence generator.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Number of IDs to reserve in each batch.
    pub batch_size_ids: u64,
    /// First value handed out by a new sequence.
    pub start_value: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            batch_size_ids: 100,
            start_value: 1,
        }
    }
}

/// Local batch state.
struct SequenceState {
    /// Next ID to return.
    next: u64,
    /// End of current batch (exclusive).
    batch_end: u64,
}

/// Distributed sequence number generator.
pub struct SequenceGenerator<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    key: String,
    config: SequenceConfig,
    state: Mutex<SequenceState>,
}

impl<S: KeyValueStore + ?Sized> SequenceGenerator<S> {
    /// Create a new sequence generator.
    pub fn new(store: Arc<S>, key: impl Into<String>, config: SequenceConfig) -> Self {
        let key = key.into();
        assert!(!key.is_empty(), "SEQUENCE: key must not be empty");
        assert!(config.batch_size_ids > 0, "SEQUENCE: batch_size must be positive");
        assert!(config.start_value > 0, "SEQUENCE: start_value must be positive");

        Self {
            store,
            key,
            config,
            state: Mutex::new(SequenceState { next: 0, batch_end: 0 }),
        }
    }

    /// Get the next sequence number.
    ///
    /// Fast path: returns from the local batch.
    /// Slow path: reserves a new batch from the store.
    pub async fn next(&self) -> Result<u64, CoordinationError> {
        let mut state = self.state.lock().await;
        if state.next < state.batch_end {
            let id = state.next;
            state.next += 1;
            return Ok(id);
        }

        let batch_start = self.reserve(self.config.batch_size_ids).await?;
        state.next = batch_start
            .checked_add(1)
            .ok_or_else(|| CoordinationError::SequenceExhausted { key: self.key.clone() })?;
        state.batch_end = batch_start
            .checked_add(self.config.batch_size_ids)
            .ok_or_else(|| CoordinationError::SequenceExhausted { key: self.key.clone() })?;

        debug!(key = %self.key, batch_start, batch_end = state.batch_end, "reserved new sequence batch");
        Ok(batch_start)
    }

    /// Reserve `count` consecutive sequence numbers.
    ///
    /// Returns the start of the range; the caller owns `[start, start + count)`.
    /// The store holds the last value handed out by any reservation.
    pub async fn reserve(&self, count: u64) -> Result<u64, CoordinationError> {
        assert!(count > 0, "SEQUENCE: reserve count must be positive");

        let mut backoff = CasBackoff::new("sequence reserve");
        loop {
            let (current, exists) = self.read_current().await?;
            let new_value = current
                .checked_add(count)
                .ok_or_else(|| CoordinationError::SequenceExhausted { key: self.key.clone() })?;
            let expected = exists.then(|| current.to_string());

            match self.store.write(WriteRequest::compare_and_swap(&self.key, expected, new_value.to_string())).await {
                Ok(_) => {
                    let range_start = current + 1;
                    debug_assert!(new_value > current, "SEQUENCE: values must increase");
                    debug!(key = %self.key, range_start, range_end = new_value, count, "reserved sequence range");
                    return Ok(range_start);
                }
                Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => backoff.wait().await?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Current stored value and whether the key exists.
    ///
    /// A missing key behaves as if `start_value - 1` had been handed out.
    async fn read_current(&self) -> Result<(u64, bool), CoordinationError> {
        let result = self.store.read(ReadRequest::new(self.key.clone())).await?;
        match result.kv {
            Some(kv) if !kv.value.is_empty() => {
                let value = kv.value.parse::<u64>().map_err(|_| CoordinationError::CorruptedData {
                    key: self.key.clone(),
                    reason: "not a valid u64".to_string(),
                })?;
                Ok((value, true))
            }
            _ => Ok((self.config.start_value - 1, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use residency_kv::DeterministicKeyValueStore;

    use super::*;

    #[tokio::test]
    async fn first_value_is_start_value() {
        let store = DeterministicKeyValueStore::new();
        let seq = SequenceGenerator::new(store, "seq", SequenceConfig::default());
        assert_eq!(seq.next().await.unwrap(), 1);
        assert_eq!(seq.next().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn generators_sharing_a_key_never_collide() {
        let store = DeterministicKeyValueStore::new();
        let config = SequenceConfig {
            batch_size_ids: 3,
            start_value: 1,
        };
        let a = SequenceGenerator::new(store.clone(), "seq", config.clone());
        let b = SequenceGenerator::new(store, "seq", config);

        let mut seen = HashSet::new();
        for _ in 0..10 {
            assert!(seen.insert(a.next().await.unwrap()));
            assert!(seen.insert(b.next().await.unwrap()));
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn reservations_are_disjoint() {
        let store = DeterministicKeyValueStore::new();
        let seq = SequenceGenerator::new(store, "seq", SequenceConfig::default());
        let first = seq.reserve(10).await.unwrap();
        let second = seq.reserve(5).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 11);
    }

    #[tokio::test]
    async fn custom_start_value() {
        let store = DeterministicKeyValueStore::new();
        let seq = SequenceGenerator::new(store, "seq", SequenceConfig {
            batch_size_ids: 1,
            start_value: 1000,
        });
        assert_eq!(seq.next().await.unwrap(), 1000);
        assert_eq!(seq.next().await.unwrap(), 1001);
    }

    #[tokio::test]
    async fn overflow_is_reported() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("seq", u64::MAX.to_string())).await.unwrap();
        let seq = SequenceGenerator::new(store, "seq", SequenceConfig::default());
        let err = seq.next().await.unwrap_err();
        assert!(matches!(err, CoordinationError::SequenceExhausted { .. }));
    }

    #[tokio::test]
    async fn corrupted_value_is_reported() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("seq", "garbage")).await.unwrap();
        let seq = SequenceGenerator::new(store, "seq", SequenceConfig::default());
        let err = seq.next().await.unwrap_err();
        assert!(matches!(err, CoordinationError::CorruptedData { .. }));
    }
}
