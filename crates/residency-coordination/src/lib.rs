//! Cluster coordination primitives built on compare-and-swap.
//!
//! - `BarrierManager` - N-participant rendezvous with abort
//! - `LockManager` - shared/exclusive named locks owned by a query
//! - `SequenceGenerator` - globally unique, monotonically increasing ids
//!
//! All primitives keep their state as JSON in a [`residency_kv::KeyValueStore`]
//! and inherit its linearizability: a value written before a barrier is
//! released is visible to every participant after it.
//!
//! ## Barrier Example
//!
//! ```ignore
//! use residency_coordination::BarrierManager;
//!
//! let barrier = BarrierManager::new(store);
//! // Blocks until three participants have entered "q1/create/0".
//! barrier.enter("q1/create/0", "instance-2", 3, None).await?;
//! ```

mod barrier;
pub mod constants;
mod error;
mod lock;
pub mod pure;
mod retry;
mod sequence;
mod types;

pub use barrier::BarrierManager;
pub use barrier::BarrierPhase;
pub use barrier::BarrierState;
pub use barrier::BarrierStatus;
pub use error::CoordinationError;
pub use lock::LockGrant;
pub use lock::LockManager;
pub use sequence::SequenceConfig;
pub use sequence::SequenceGenerator;
pub use types::LockHolder;
pub use types::LockMode;
pub use types::LockState;
pub use types::now_unix_ms;
