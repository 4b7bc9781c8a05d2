//! Retry and polling bounds for coordination primitives.

/// Maximum compare-and-swap attempts before giving up.
pub const MAX_CAS_RETRIES: u32 = 64;

/// Initial backoff between compare-and-swap retries.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;

/// Upper bound on the compare-and-swap retry backoff.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 64;

/// Default interval between barrier state polls.
pub const DEFAULT_BARRIER_POLL_INTERVAL_MS: u64 = 50;

/// Maximum number of participants a single barrier accepts.
pub const MAX_BARRIER_PARTICIPANTS: u32 = 4096;

const _: () = assert!(MAX_CAS_RETRIES > 0);
const _: () = assert!(CAS_RETRY_INITIAL_BACKOFF_MS <= CAS_RETRY_MAX_BACKOFF_MS);
const _: () = assert!(DEFAULT_BARRIER_POLL_INTERVAL_MS > 0);
