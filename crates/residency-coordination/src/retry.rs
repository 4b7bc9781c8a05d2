//! Retry helpers for compare-and-swap loops.

use std::time::Duration;

use crate::constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use crate::constants::CAS_RETRY_MAX_BACKOFF_MS;
use crate::constants::MAX_CAS_RETRIES;
use crate::error::CoordinationError;

/// Exponential backoff between compare-and-swap retries.
pub(crate) struct CasBackoff {
    operation: &'static str,
    attempt: u32,
    backoff_ms: u64,
}

impl CasBackoff {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self {
            operation,
            attempt: 0,
            backoff_ms: CAS_RETRY_INITIAL_BACKOFF_MS,
        }
    }

    pub(crate) async fn wait(&mut self) -> Result<(), CoordinationError> {
        self.attempt += 1;
        if self.attempt >= MAX_CAS_RETRIES {
            return Err(CoordinationError::MaxRetriesExceeded {
                operation: self.operation.to_string(),
                attempts: self.attempt,
            });
        }
        tokio::time::sleep(Duration::from_millis(self.backoff_ms)).await;
        self.backoff_ms = (self.backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
        Ok(())
    }
}
