//! Pure decision functions for coordination primitives.
//!
//! Everything here is deterministic and side-effect free: no I/O, no clock
//! reads. The stateful managers read state from the store, ask these
//! functions what to do, and write the result back with compare-and-swap.
//!
//! - [`barrier`]: phase transitions and readiness
//! - [`lock`]: lock compatibility and grants

pub mod barrier;
pub mod lock;

pub use barrier::compute_initial_barrier_phase;
pub use barrier::is_barrier_ready;
pub use barrier::should_transition_to_ready;
pub use lock::LockDecision;
pub use lock::evaluate_lock_request;
pub use lock::remove_holder;
