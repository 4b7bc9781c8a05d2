use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::parser::write_csv;
use crate::error::ResidencyError;
use crate::types::InstanceId;

/// Validated placement of an array: a sorted, de-duplicated, non-empty list
/// of instances that were alive when the set was resolved.
///
/// Displays in canonical `instances=1,2,3` form, which parses back to the
/// same set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<InstanceId>", into = "Vec<InstanceId>")]
pub struct ResidencySet(Vec<InstanceId>);

impl ResidencySet {
    pub fn new(instances: impl IntoIterator<Item = InstanceId>) -> Result<Self, ResidencyError> {
        let mut instances: Vec<InstanceId> = instances.into_iter().collect();
        instances.sort_unstable();
        instances.dedup();

        if instances.is_empty() {
            return Err(ResidencyError::EmptyResidency {
                reason: "no instances specified".into(),
            });
        }

        Ok(Self(instances))
    }

    pub fn as_slice(&self) -> &[InstanceId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, instance_id: InstanceId) -> bool {
        self.0.binary_search(&instance_id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<InstanceId>> for ResidencySet {
    type Error = ResidencyError;

    fn try_from(instances: Vec<InstanceId>) -> Result<Self, Self::Error> {
        Self::new(instances)
    }
}

impl From<ResidencySet> for Vec<InstanceId> {
    fn from(set: ResidencySet) -> Self {
        set.0
    }
}

impl fmt::Display for ResidencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("instances=")?;
        write_csv(f, self.0.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residency::parser::ResidencyInput;
    use crate::residency::parser::ResidencySpec;

    #[test]
    fn test_sorted_and_deduplicated() {
        let set = ResidencySet::new([InstanceId(3), InstanceId(1), InstanceId(3)]).unwrap();
        assert_eq!(set.as_slice(), &[InstanceId(1), InstanceId(3)]);
        assert!(set.contains(InstanceId(3)));
        assert!(!set.contains(InstanceId(2)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(ResidencySet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_canonical_form_reparses() {
        let set = ResidencySet::new([InstanceId(2), InstanceId(0), InstanceId(7)]).unwrap();
        assert_eq!(set.to_string(), "instances=0,2,7");

        let spec = ResidencySpec::parse(&ResidencyInput::StringForm(set.to_string())).unwrap();
        let reparsed: Vec<u64> = spec.raw_tokens().iter().copied().collect();
        assert_eq!(reparsed, vec![0, 2, 7]);
    }

    #[test]
    fn test_serde_rejects_empty() {
        let json = serde_json::to_string(&ResidencySet::new([InstanceId(4)]).unwrap()).unwrap();
        assert_eq!(json, "[4]");
        assert!(serde_json::from_str::<ResidencySet>("[]").is_err());
    }
}
