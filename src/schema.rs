//! Array schema records written to the catalog.

use serde::Deserialize;
use serde::Serialize;

use crate::residency::ResidencySet;
use crate::types::ArrayId;
use crate::types::VersionId;

/// Separator between namespace and array name in a qualified name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Separator between array name and version in a versioned name.
pub const VERSION_SEPARATOR: char = '@';

/// Joins namespace and name in catalog keys and lock names.
pub const KEY_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub start: i64,
    /// Inclusive upper bound; `None` for an unbounded dimension.
    pub end: Option<i64>,
    pub chunk_interval: u64,
}

/// User-supplied attribute and dimension layout of a new array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayShape {
    pub attributes: Vec<Attribute>,
    pub dimensions: Vec<Dimension>,
}

impl ArrayShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        });
        self
    }

    pub fn dimension(mut self, name: impl Into<String>, start: i64, end: Option<i64>, chunk_interval: u64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            start,
            end,
            chunk_interval,
        });
        self
    }
}

/// How chunks are spread over an array's residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Distribution {
    /// Chunks are hash-partitioned over the residency; each chunk is stored
    /// on `redundancy` additional instances.
    HashPartitioned { redundancy: u32 },
}

impl Distribution {
    pub fn default_partitioning(redundancy: u32) -> Self {
        Distribution::HashPartitioned { redundancy }
    }

    pub fn redundancy(&self) -> u32 {
        match self {
            Distribution::HashPartitioned { redundancy } => *redundancy,
        }
    }
}

/// Schema of one array, including its residency.
///
/// Schema inference produces a draft with no ids. Only the coordinator
/// finalizes it with an allocated array id and version 0 before it is
/// written to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub namespace: String,
    pub name: String,
    pub shape: ArrayShape,
    pub distribution: Distribution,
    pub residency: ResidencySet,
    pub transient: bool,
    pub array_id: Option<ArrayId>,
    pub version_id: Option<VersionId>,
}

impl ArraySchema {
    pub fn draft(namespace: impl Into<String>, name: impl Into<String>, shape: ArrayShape, residency: ResidencySet) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            shape,
            distribution: Distribution::default_partitioning(0),
            residency,
            transient: false,
            array_id: None,
            version_id: None,
        }
    }

    pub fn finalize(&mut self, array_id: ArrayId) {
        self.array_id = Some(array_id);
        self.version_id = Some(VersionId::INITIAL);
    }

    pub fn is_finalized(&self) -> bool {
        self.array_id.is_some() && self.version_id.is_some()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{}", self.namespace, self.name)
    }
}

/// True if `name` refers to a specific version (`name@N`).
pub fn is_name_versioned(name: &str) -> bool {
    match name.rsplit_once(VERSION_SEPARATOR) {
        Some((base, version)) => !base.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Split `ns.name` into its parts, falling back to `current_namespace` for a
/// bare name.
pub fn split_qualified_name<'a>(raw: &'a str, current_namespace: &'a str) -> (&'a str, &'a str) {
    match raw.split_once(NAMESPACE_SEPARATOR) {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => (namespace, name),
        _ => (current_namespace, raw),
    }
}

/// Check that `namespace` and `name` identify exactly one catalog key and
/// lock name. Returns the reason on failure.
pub fn validate_array_name(namespace: &str, name: &str) -> Result<(), String> {
    if namespace.is_empty() {
        return Err("namespace is empty".into());
    }
    if name.is_empty() {
        return Err("array name is empty".into());
    }
    for (what, part) in [("namespace", namespace), ("array name", name)] {
        if part.contains(KEY_SEPARATOR) {
            return Err(format!("{what} '{part}' contains '{KEY_SEPARATOR}'"));
        }
        if part.contains(NAMESPACE_SEPARATOR) {
            return Err(format!("{what} '{part}' contains '{NAMESPACE_SEPARATOR}'"));
        }
    }
    Ok(())
}
