//! `create_with_residency` and `store_to_instances` operators.
//!
//! Creation runs in two phases. On the coordinator, [`CreateWithResidency`]
//! takes the array lock and infers the schema, including the validated
//! residency. Every participant then runs [`PhysicalCreateWithResidency`],
//! which commits the schema on the coordinator and, for transient arrays,
//! registers the array locally once the commit is visible.

mod create;
mod protocol;
mod store_to_instances;

pub use create::CreateArrayRequest;
pub use create::CreateWithResidency;
pub use create::Permission;
pub use create::RequiredPermission;
pub use protocol::CREATE_BARRIER_STEP;
pub use protocol::CreateOutcome;
pub use protocol::PhysicalCreateWithResidency;
pub use protocol::ProtocolState;
pub use protocol::next_state;
pub use store_to_instances::StoreToInstances;
