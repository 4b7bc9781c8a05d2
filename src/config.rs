use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

/// Node-level settings for residency-aware array creation.
///
/// Configuration is loaded in layers with the following precedence (lowest to highest):
/// 1. Environment variables (RESIDENCY_*)
/// 2. TOML configuration file
/// 3. Command-line arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidencyConfig {
    /// Cluster-wide redundancy applied to the default partitioning of new arrays.
    #[serde(default)]
    pub redundancy: u32,

    /// Namespace used for array names without a `ns.` qualifier.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Upper bound on the creation barrier wait. `None` waits until the
    /// query is cancelled by its caller.
    #[serde(default)]
    pub barrier_timeout_ms: Option<u64>,

    /// How often a waiting participant re-reads barrier state.
    #[serde(default = "default_barrier_poll_interval_ms")]
    pub barrier_poll_interval_ms: u64,

    /// Number of array ids reserved per catalog round-trip.
    #[serde(default = "default_id_batch_size")]
    pub id_batch_size: u64,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            redundancy: 0,
            default_namespace: default_namespace(),
            barrier_timeout_ms: None,
            barrier_poll_interval_ms: default_barrier_poll_interval_ms(),
            id_batch_size: default_id_batch_size(),
        }
    }
}

impl ResidencyConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern RESIDENCY_<FIELD_NAME> (uppercase).
    pub fn from_env() -> Self {
        Self {
            redundancy: parse_env("RESIDENCY_REDUNDANCY").unwrap_or(0),
            default_namespace: parse_env("RESIDENCY_DEFAULT_NAMESPACE").unwrap_or_else(default_namespace),
            barrier_timeout_ms: parse_env("RESIDENCY_BARRIER_TIMEOUT_MS"),
            barrier_poll_interval_ms: parse_env("RESIDENCY_BARRIER_POLL_INTERVAL_MS")
                .unwrap_or_else(default_barrier_poll_interval_ms),
            id_batch_size: parse_env("RESIDENCY_ID_BATCH_SIZE").unwrap_or_else(default_id_batch_size),
        }
    }

    /// Merge another configuration into this one.
    ///
    /// Fields in `other` that differ from their defaults override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.redundancy != 0 {
            self.redundancy = other.redundancy;
        }
        if other.default_namespace != default_namespace() {
            self.default_namespace = other.default_namespace;
        }
        if other.barrier_timeout_ms.is_some() {
            self.barrier_timeout_ms = other.barrier_timeout_ms;
        }
        if other.barrier_poll_interval_ms != default_barrier_poll_interval_ms() {
            self.barrier_poll_interval_ms = other.barrier_poll_interval_ms;
        }
        if other.id_batch_size != default_id_batch_size() {
            self.id_batch_size = other.id_batch_size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_namespace.is_empty() {
            return Err(ConfigError::Validation {
                message: "default_namespace must not be empty".into(),
            });
        }

        if self.default_namespace.contains('.') {
            return Err(ConfigError::Validation {
                message: format!("default_namespace '{}' must not contain '.'", self.default_namespace),
            });
        }

        if self.barrier_poll_interval_ms == 0 {
            return Err(ConfigError::Validation {
                message: "barrier_poll_interval_ms must be non-zero".into(),
            });
        }

        if self.id_batch_size == 0 {
            return Err(ConfigError::Validation {
                message: "id_batch_size must be non-zero".into(),
            });
        }

        Ok(())
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    pub fn barrier_poll_interval(&self) -> Duration {
        Duration::from_millis(self.barrier_poll_interval_ms)
    }
}

fn default_namespace() -> String {
    "public".into()
}

fn default_barrier_poll_interval_ms() -> u64 {
    residency_coordination::constants::DEFAULT_BARRIER_POLL_INTERVAL_MS
}

fn default_id_batch_size() -> u64 {
    16
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
