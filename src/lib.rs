//! Residency-aware array creation for a distributed array catalog.
//!
//! `create_with_residency` pins a new array to an explicit set of instances
//! instead of the default placement:
//!
//! 1. The residency argument (`servers=<csv>`, `instances=<csv>` or a list of
//!    instance ids) is parsed into a [`ResidencySpec`].
//! 2. The [`ResidencySpec`] is resolved against a [`MembershipSnapshot`] into a
//!    [`ResidencySet`] of live instances.
//! 3. The set is attached to the draft [`ArraySchema`].
//! 4. An exclusive catalog lock on the array name is held for the query.
//! 5. At execution the coordinator commits the schema; for transient arrays
//!    every instance then registers the array locally after a barrier.
//!
//! Steps 1-4 happen on the coordinator before anything is written, so every
//! input error is reported before the catalog changes.

pub mod barrier;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lock;
pub mod membership;
pub mod operator;
pub mod query;
pub mod residency;
pub mod schema;
pub mod sim;
pub mod transient;
pub mod types;

pub use catalog::Catalog;
pub use catalog::CatalogError;
pub use config::ResidencyConfig;
pub use error::ErrorKind;
pub use error::ResidencyError;
pub use operator::CreateArrayRequest;
pub use operator::CreateWithResidency;
pub use operator::PhysicalCreateWithResidency;
pub use operator::StoreToInstances;
pub use query::NodeServices;
pub use query::QueryContext;
pub use residency::MembershipSnapshot;
pub use residency::ResidencyInput;
pub use residency::ResidencySet;
pub use residency::ResidencySpec;
pub use schema::ArraySchema;
pub use schema::ArrayShape;
pub use types::ArrayId;
pub use types::InstanceId;
pub use types::QueryId;
pub use types::ServerId;
pub use types::VersionId;
