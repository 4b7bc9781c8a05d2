//! Residency input parsing, resolution against cluster membership, and the
//! validated [`ResidencySet`] carried on an array schema.

mod parser;
mod resolver;
mod set;

pub use parser::ResidencyInput;
pub use parser::ResidencyMode;
pub use parser::ResidencySpec;
pub use resolver::InstanceInfo;
pub use resolver::MembershipSnapshot;
pub use resolver::resolve;
pub use set::ResidencySet;
