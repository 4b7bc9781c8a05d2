//! Error types for residency-aware array creation.

use residency_coordination::CoordinationError;
use snafu::Snafu;

use crate::catalog::CatalogError;
use crate::types::InstanceId;

/// Errors surfaced to the client issuing a `create_with_residency` statement.
///
/// The first four variants are input-validation failures, reported during
/// schema inference before anything is written.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResidencyError {
    /// Malformed residency string or unparsable numeric token.
    #[snafu(display("invalid parameter {input}: {reason}"))]
    Parse { input: String, reason: String },

    /// The same identifier was listed twice in one input.
    #[snafu(display("element {value} specified multiple times"))]
    DuplicateEntry { value: u64 },

    /// A named or expanded instance is not alive in the membership snapshot.
    #[snafu(display("Physical Instance ID {instance_id} is not currently alive."))]
    DeadInstance { instance_id: InstanceId },

    /// Resolution produced zero instances.
    #[snafu(display("{reason}"))]
    EmptyResidency { reason: String },

    /// The catalog lookup for the target array failed with anything other
    /// than "array does not exist".
    #[snafu(display("catalog conflict on array {namespace}.{array}: {source}"))]
    CatalogConflict {
        namespace: String,
        array: String,
        source: CatalogError,
    },

    /// Another query holds a conflicting lock on the array name.
    #[snafu(display("array {namespace}.{array} is locked by query {holder_query}"))]
    LockDenied {
        namespace: String,
        array: String,
        holder_query: String,
    },

    /// The surrounding system broke one of its own guarantees.
    #[snafu(display("protocol invariant violated: {context}"))]
    ProtocolInvariantViolation { context: String },

    /// Catalog failure while committing or re-reading the array schema.
    #[snafu(display("catalog {operation} failed: {source}"))]
    Catalog {
        operation: &'static str,
        source: CatalogError,
    },

    /// Lock, barrier or sequence storage failure.
    #[snafu(display("{operation} failed: {source}"))]
    Coordination {
        operation: &'static str,
        source: CoordinationError,
    },
}

/// Flat classification of [`ResidencyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    DuplicateEntry,
    DeadInstance,
    EmptyResidency,
    CatalogConflict,
    LockDenied,
    ProtocolInvariantViolation,
    Catalog,
    Coordination,
}

impl ResidencyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResidencyError::Parse { .. } => ErrorKind::Parse,
            ResidencyError::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            ResidencyError::DeadInstance { .. } => ErrorKind::DeadInstance,
            ResidencyError::EmptyResidency { .. } => ErrorKind::EmptyResidency,
            ResidencyError::CatalogConflict { .. } => ErrorKind::CatalogConflict,
            ResidencyError::LockDenied { .. } => ErrorKind::LockDenied,
            ResidencyError::ProtocolInvariantViolation { .. } => ErrorKind::ProtocolInvariantViolation,
            ResidencyError::Catalog { .. } => ErrorKind::Catalog,
            ResidencyError::Coordination { .. } => ErrorKind::Coordination,
        }
    }

    /// True for errors caused by the statement's own arguments.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse | ErrorKind::DuplicateEntry | ErrorKind::DeadInstance | ErrorKind::EmptyResidency
        )
    }
}
