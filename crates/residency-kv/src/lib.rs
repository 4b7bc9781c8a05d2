//! Key-value store seam for the residency catalog and coordination primitives.
//!
//! The catalog, the catalog lock table and the create-protocol barrier all
//! live in one linearizable key-value store. This crate defines the store
//! interface and an in-memory implementation used by tests and the
//! simulator.

pub mod constants;
mod error;
mod inmemory;
mod kv;
mod traits;
mod validation;

pub use error::KeyValueStoreError;
pub use inmemory::DeterministicKeyValueStore;
pub use kv::DeleteRequest;
pub use kv::DeleteResult;
pub use kv::KeyValueWithRevision;
pub use kv::ReadRequest;
pub use kv::ReadResult;
pub use kv::ScanRequest;
pub use kv::ScanResult;
pub use kv::WriteCommand;
pub use kv::WriteRequest;
pub use kv::WriteResult;
pub use traits::KeyValueStore;
pub use validation::validate_write_command;
