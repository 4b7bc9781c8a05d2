//! Parsing of residency arguments.
//!
//! Two surface forms are accepted: a single `servers=<csv>` / `instances=<csv>`
//! string, or a list of instance ids supplied directly by the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ResidencyError;

const SERVERS_PREFIX: &str = "servers=";
const INSTANCES_PREFIX: &str = "instances=";

/// Residency argument as supplied to `create_with_residency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyInput {
    /// `"servers=0,1"` or `"instances=1,2,3"`.
    StringForm(String),
    /// Variadic instance ids; always instance ids, never servers.
    InstanceList(Vec<u64>),
}

/// What the raw identifiers of a [`ResidencySpec`] refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyMode {
    ServerList,
    InstanceList,
}

/// Mode-tagged, duplicate-free, non-empty set of raw identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidencySpec {
    mode: ResidencyMode,
    raw_tokens: BTreeSet<u64>,
}

impl ResidencySpec {
    pub fn parse(input: &ResidencyInput) -> Result<Self, ResidencyError> {
        match input {
            ResidencyInput::StringForm(s) => s.parse(),
            ResidencyInput::InstanceList(ids) => Self::from_ids(ResidencyMode::InstanceList, ids.iter().copied().map(Ok)),
        }
    }

    pub fn mode(&self) -> ResidencyMode {
        self.mode
    }

    pub fn raw_tokens(&self) -> &BTreeSet<u64> {
        &self.raw_tokens
    }

    /// Consumes ids in input order; a duplicate fails as soon as it is read,
    /// before any later token is parsed.
    fn from_ids(
        mode: ResidencyMode,
        ids: impl IntoIterator<Item = Result<u64, ResidencyError>>,
    ) -> Result<Self, ResidencyError> {
        let mut raw_tokens = BTreeSet::new();
        for id in ids {
            let id = id?;
            if !raw_tokens.insert(id) {
                return Err(ResidencyError::DuplicateEntry { value: id });
            }
        }

        if raw_tokens.is_empty() {
            return Err(ResidencyError::EmptyResidency {
                reason: "no instances specified".into(),
            });
        }

        Ok(Self { mode, raw_tokens })
    }
}

impl FromStr for ResidencySpec {
    type Err = ResidencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (mode, list) = if let Some(rest) = trimmed.strip_prefix(SERVERS_PREFIX) {
            (ResidencyMode::ServerList, rest)
        } else if let Some(rest) = trimmed.strip_prefix(INSTANCES_PREFIX) {
            (ResidencyMode::InstanceList, rest)
        } else {
            return Err(ResidencyError::Parse {
                input: s.to_string(),
                reason: format!("expected '{SERVERS_PREFIX}' or '{INSTANCES_PREFIX}' prefix"),
            });
        };

        let mut tokens: Vec<&str> = list.split(',').collect();
        // A single trailing delimiter ("1,2,") does not introduce an empty element.
        if tokens.last().is_some_and(|t| t.trim().is_empty()) {
            tokens.pop();
        }

        let ids = tokens.into_iter().map(|token| {
            token.trim().parse::<u64>().map_err(|_| ResidencyError::Parse {
                input: s.to_string(),
                reason: "could not parse instance/server list".into(),
            })
        });

        Self::from_ids(mode, ids)
    }
}

impl fmt::Display for ResidencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.mode {
            ResidencyMode::ServerList => SERVERS_PREFIX,
            ResidencyMode::InstanceList => INSTANCES_PREFIX,
        };
        f.write_str(prefix)?;
        write_csv(f, self.raw_tokens.iter())
    }
}

pub(crate) fn write_csv<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn parse(s: &str) -> Result<ResidencySpec, ResidencyError> {
        ResidencySpec::parse(&ResidencyInput::StringForm(s.to_string()))
    }

    #[test]
    fn test_instances_prefix() {
        let spec = parse("instances=3,1,2").unwrap();
        assert_eq!(spec.mode(), ResidencyMode::InstanceList);
        assert_eq!(spec.raw_tokens().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_servers_prefix() {
        let spec = parse("servers=0").unwrap();
        assert_eq!(spec.mode(), ResidencyMode::ServerList);
        assert!(spec.raw_tokens().contains(&0));
    }

    #[test]
    fn test_whitespace_tolerated() {
        let spec = parse("  instances= 4 , 7 ,9  ").unwrap();
        assert_eq!(spec.raw_tokens().len(), 3);
        assert!(spec.raw_tokens().contains(&7));
    }

    #[test]
    fn test_trailing_comma() {
        let spec = parse("instances=1,2,").unwrap();
        assert_eq!(spec.raw_tokens().len(), 2);
    }

    #[test]
    fn test_unknown_prefix() {
        let err = parse("nodes=1,2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().starts_with("invalid parameter nodes=1,2"));
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        assert_eq!(parse("Instances=1").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_bad_token() {
        for input in ["instances=1,x", "instances=1,,2", "servers=-1", "instances=18446744073709551616"] {
            let err = parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "{input}");
            assert!(err.to_string().contains("could not parse instance/server list"));
        }
    }

    #[test]
    fn test_duplicate_in_string() {
        let err = parse("servers=2,1,2").unwrap_err();
        assert!(matches!(err, ResidencyError::DuplicateEntry { value: 2 }));
    }

    #[test]
    fn test_duplicate_reported_before_later_bad_token() {
        let err = parse("instances=1,1,x").unwrap_err();
        assert!(matches!(err, ResidencyError::DuplicateEntry { value: 1 }), "{err:?}");
        assert_eq!(err.to_string(), "element 1 specified multiple times");

        // A bad token ahead of the repeat is still a parse error.
        assert_eq!(parse("instances=x,1,1").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_duplicate_in_list() {
        let err = ResidencySpec::parse(&ResidencyInput::InstanceList(vec![5, 5])).unwrap_err();
        assert!(matches!(err, ResidencyError::DuplicateEntry { value: 5 }));
    }

    #[test]
    fn test_empty_list() {
        let err = ResidencySpec::parse(&ResidencyInput::InstanceList(vec![])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyResidency);
        assert_eq!(err.to_string(), "no instances specified");

        assert_eq!(parse("instances=").unwrap_err().kind(), ErrorKind::EmptyResidency);
    }

    #[test]
    fn test_list_form_is_instance_mode() {
        let spec = ResidencySpec::parse(&ResidencyInput::InstanceList(vec![9, 2])).unwrap();
        assert_eq!(spec.mode(), ResidencyMode::InstanceList);
        assert_eq!(spec.to_string(), "instances=2,9");
    }
}
