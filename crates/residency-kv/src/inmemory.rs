//! Deterministic in-memory key-value store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::constants::DEFAULT_SCAN_LIMIT;
use crate::constants::MAX_SCAN_RESULTS;
use crate::error::KeyValueStoreError;
use crate::kv::DeleteRequest;
use crate::kv::DeleteResult;
use crate::kv::KeyValueWithRevision;
use crate::kv::ReadRequest;
use crate::kv::ReadResult;
use crate::kv::ScanRequest;
use crate::kv::ScanResult;
use crate::kv::WriteCommand;
use crate::kv::WriteRequest;
use crate::kv::WriteResult;
use crate::traits::KeyValueStore;
use crate::validation::validate_write_command;

#[derive(Clone)]
struct VersionedValue {
    value: String,
    version: u64,
    create_revision: u64,
    mod_revision: u64,
}

struct StoreState {
    data: BTreeMap<String, VersionedValue>,
    revision: u64,
}

impl StoreState {
    fn put(&mut self, key: String, value: String) -> u64 {
        self.revision += 1;
        let revision = self.revision;
        match self.data.get_mut(&key) {
            Some(existing) => {
                existing.value = value;
                existing.version += 1;
                existing.mod_revision = revision;
            }
            None => {
                self.data.insert(key, VersionedValue {
                    value,
                    version: 1,
                    create_revision: revision,
                    mod_revision: revision,
                });
            }
        }
        revision
    }
}

/// A deterministic in-memory key-value store.
///
/// Thread-safe and linearizable: every operation takes the single state lock,
/// so the store stands in for a replicated store in multi-instance tests.
pub struct DeterministicKeyValueStore {
    state: RwLock<StoreState>,
}

impl Default for DeterministicKeyValueStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(StoreState {
                data: BTreeMap::new(),
                revision: 0,
            }),
        }
    }
}

impl DeterministicKeyValueStore {
    /// Create a new empty store wrapped in `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        validate_write_command(&request.command)?;

        let mut state = self.state.write().await;
        match request.command.clone() {
            WriteCommand::Set { key, value } => {
                let revision = state.put(key, value);
                Ok(WriteResult {
                    command: Some(request.command),
                    header_revision: Some(revision),
                    succeeded: None,
                })
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                let current = state.data.get(&key).map(|v| v.value.clone());
                if current != expected {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key,
                        expected,
                        actual: current,
                    });
                }
                let revision = state.put(key, new_value);
                Ok(WriteResult {
                    command: Some(request.command),
                    header_revision: Some(revision),
                    succeeded: Some(true),
                })
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                let matches = state.data.get(&key).is_some_and(|v| v.value == expected);
                if matches {
                    state.data.remove(&key);
                }
                Ok(WriteResult {
                    command: Some(request.command),
                    header_revision: None,
                    succeeded: Some(matches),
                })
            }
        }
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let state = self.state.read().await;
        let kv = state.data.get(&request.key).map(|v| KeyValueWithRevision {
            key: request.key.clone(),
            value: v.value.clone(),
            version: v.version,
            create_revision: v.create_revision,
            mod_revision: v.mod_revision,
        });
        Ok(ReadResult { kv })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        let mut state = self.state.write().await;
        let deleted = state.data.remove(&request.key).is_some();
        Ok(DeleteResult {
            key: request.key,
            deleted,
        })
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResult, KeyValueStoreError> {
        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT).min(MAX_SCAN_RESULTS) as usize;
        let state = self.state.read().await;

        let mut matching = state
            .data
            .range(request.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&request.prefix));

        let entries: Vec<KeyValueWithRevision> = matching
            .by_ref()
            .take(limit)
            .map(|(key, v)| KeyValueWithRevision {
                key: key.clone(),
                value: v.value.clone(),
                version: v.version,
                create_revision: v.create_revision,
                mod_revision: v.mod_revision,
            })
            .collect();
        let is_truncated = matching.next().is_some();

        Ok(ScanResult {
            count: entries.len() as u32,
            entries,
            is_truncated,
        })
    }
}
