//! Error types for coordination primitives.

use residency_kv::KeyValueStoreError;
use snafu::Snafu;

use crate::types::LockMode;

/// Errors from coordination primitives.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Lock is held by another query in an incompatible mode.
    #[snafu(display("lock '{name}' held by query '{holder_query}' in {mode} mode"))]
    LockHeld {
        /// Lock name.
        name: String,
        /// Query currently holding the lock.
        holder_query: String,
        /// Mode the lock is held in.
        mode: LockMode,
    },

    /// A participant aborted the barrier before it was released.
    #[snafu(display("barrier '{name}' aborted: {reason}"))]
    BarrierAborted {
        /// Barrier name.
        name: String,
        /// Reason given by the aborting participant.
        reason: String,
    },

    /// Barrier already holds its required number of participants.
    #[snafu(display("barrier '{name}' is full: {required} participants already entered"))]
    BarrierFull {
        /// Barrier name.
        name: String,
        /// Required participant count.
        required: u32,
    },

    /// Operation timed out.
    #[snafu(display("operation timed out: {operation}"))]
    Timeout {
        /// Description of the operation.
        operation: String,
    },

    /// Maximum retries exceeded.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Sequence numbers exhausted (u64 overflow).
    #[snafu(display("sequence exhausted for key '{key}'"))]
    SequenceExhausted {
        /// The sequence key.
        key: String,
    },

    /// Data in storage is corrupted or unparseable.
    #[snafu(display("corrupted data in key '{key}': {reason}"))]
    CorruptedData {
        /// The key with corrupted data.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// CAS operation failed, retry may succeed.
    #[snafu(display("CAS conflict, retry needed"))]
    CasConflict,

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// JSON serialization/deserialization error.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl From<KeyValueStoreError> for CoordinationError {
    fn from(source: KeyValueStoreError) -> Self {
        CoordinationError::Storage { source }
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(source: serde_json::Error) -> Self {
        CoordinationError::Serialization { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_held_display() {
        let err = CoordinationError::LockHeld {
            name: "public/a".into(),
            holder_query: "q1".into(),
            mode: LockMode::Exclusive,
        };
        assert_eq!(err.to_string(), "lock 'public/a' held by query 'q1' in exclusive mode");
    }

    #[test]
    fn barrier_aborted_display() {
        let err = CoordinationError::BarrierAborted {
            name: "q1/create/0".into(),
            reason: "catalog write failed".into(),
        };
        assert_eq!(err.to_string(), "barrier 'q1/create/0' aborted: catalog write failed");
    }
}
