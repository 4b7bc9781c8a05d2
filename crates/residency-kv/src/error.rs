use thiserror::Error;

/// Errors returned by [`crate::KeyValueStore`] implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
    #[error("key must not be empty")]
    EmptyKey,
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: u32, max: u32 },
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: u32, max: u32 },
    #[error("compare-and-swap failed for key '{key}': expected {expected:?}, found {actual:?}")]
    CompareAndSwapFailed {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}
