//! Shared types for coordination primitives.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Lock strength. Ordered: `Shared < Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lock holder: the owning query and the instance that requested the lock.
///
/// Ownership belongs to the query; `instance_id` is recorded for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub query_id: String,
    pub instance_id: u64,
}

/// Lock state stored in the KV store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    /// Lock name.
    pub name: String,
    /// Strongest mode currently granted.
    pub mode: LockMode,
    /// Current holders. Exactly one when `mode` is exclusive.
    pub holders: Vec<LockHolder>,
    /// Incremented on every exclusive grant.
    pub fencing_token: u64,
    /// When the lock was first granted (Unix ms).
    pub acquired_at_ms: u64,
}

impl LockState {
    pub fn held_by(&self, query_id: &str) -> bool {
        self.holders.iter().any(|h| h.query_id == query_id)
    }
}

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before UNIX epoch.
#[inline]
pub fn now_unix_ms() -> u64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
