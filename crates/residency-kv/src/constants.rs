//! Fixed bounds on key-value payloads.

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum value length in bytes.
///
/// Array schema records are the largest values written; 1 MiB leaves room
/// for schemas with thousands of attributes.
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

/// Maximum number of entries returned by a single scan.
pub const MAX_SCAN_RESULTS: u32 = 10_000;

/// Scan limit used when the request does not set one.
pub const DEFAULT_SCAN_LIMIT: u32 = 1_000;

const _: () = assert!(DEFAULT_SCAN_LIMIT <= MAX_SCAN_RESULTS);
