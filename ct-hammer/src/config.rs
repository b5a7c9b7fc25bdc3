//! Hammer configuration and built-in profiles.
//!
//! A [`HammerConfig`] describes one hammer run against one log: which entry
//! points to exercise and how often, how many rounds, how much parallelism,
//! and how failures are treated. Configs load from TOML or from a named
//! built-in profile.
//!
//! # Example
//!
//! ```ignore
//! use ct_hammer::config::{load_profile, HammerConfig};
//!
//! let config = load_profile("write-heavy").unwrap();
//! let custom = HammerConfig::from_file("hammer.toml").unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::operation::{Entrypoint, OperationBias};

/// Default maximum merge delay in seconds.
pub const DEFAULT_MMD_SECS: u64 = 86_400;

/// Default interval between status lines in seconds.
pub const DEFAULT_EMIT_INTERVAL_SECS: u64 = 10;

/// Default retry budget per round in seconds.
pub const DEFAULT_MAX_RETRY_SECS: u64 = 60;

/// Configuration for one hammer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HammerConfig {
    /// Profile name.
    pub name: String,
    /// Description of what this profile exercises.
    pub description: String,
    /// Log prefix, used in status lines and errors.
    pub log_prefix: String,
    /// Tree ID of the log, used to key stats.
    pub log_id: i64,
    /// Seed for the hammer's random number generator.
    pub seed: u64,
    /// Maximum merge delay promised by the log, in seconds.
    pub mmd_secs: u64,
    /// Relative weight of each entry point.
    pub bias: OperationBias,
    /// Number of rounds to run.
    pub operations: u64,
    /// Upper bound on concurrent submissions per write round.
    pub max_parallel_chains: usize,
    /// Seconds between status lines.
    pub emit_interval_secs: u64,
    /// Seconds a round keeps retrying before giving up.
    pub max_retry_secs: u64,
    /// Retry failed operations instead of ending the run.
    pub ignore_errors: bool,
}

impl Default for HammerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: "Balanced mix of writes, reads and proof checks".to_string(),
            log_prefix: "ct".to_string(),
            log_id: 0,
            seed: 0,
            mmd_secs: DEFAULT_MMD_SECS,
            bias: default_bias(),
            operations: 1_000,
            max_parallel_chains: 2,
            emit_interval_secs: DEFAULT_EMIT_INTERVAL_SECS,
            max_retry_secs: DEFAULT_MAX_RETRY_SECS,
            ignore_errors: false,
        }
    }
}

impl HammerConfig {
    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize the config to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Maximum merge delay.
    #[must_use]
    pub const fn mmd(&self) -> Duration {
        Duration::from_secs(self.mmd_secs)
    }

    /// Interval between status lines; 0 means the default.
    #[must_use]
    pub const fn emit_interval(&self) -> Duration {
        if self.emit_interval_secs == 0 {
            Duration::from_secs(DEFAULT_EMIT_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.emit_interval_secs)
        }
    }

    /// Retry budget per round.
    #[must_use]
    pub const fn max_retry(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }

    /// Checks that a run with this config can make progress.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry point has a positive weight or if write
    /// rounds would submit nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bias.is_schedulable() {
            return Err(ConfigError::Invalid {
                message: format!("{}: no operation has a positive weight", self.log_prefix),
            });
        }
        if self.max_parallel_chains == 0 {
            return Err(ConfigError::Invalid {
                message: format!("{}: max_parallel_chains must be at least 1", self.log_prefix),
            });
        }
        Ok(())
    }
}

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a config file.
    #[error("failed to read config from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Parse error in TOML.
    #[error("failed to parse config: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// Profile not found.
    #[error("profile not found: {name}")]
    NotFound {
        /// Profile name.
        name: String,
    },
    /// The config cannot drive a run.
    #[error("{message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

fn default_bias() -> OperationBias {
    bias(&[
        (Entrypoint::AddChain, 20),
        (Entrypoint::AddPreChain, 20),
        (Entrypoint::GetSth, 2),
        (Entrypoint::GetSthConsistency, 2),
        (Entrypoint::GetProofByHash, 2),
        (Entrypoint::GetEntries, 2),
        (Entrypoint::GetRoots, 1),
        (Entrypoint::GetEntryAndProof, 0),
    ])
}

fn bias(weights: &[(Entrypoint, u32)]) -> OperationBias {
    weights.iter().copied().collect()
}

fn profile(
    name: &str,
    desc: &str,
    bias: OperationBias,
    operations: u64,
    max_parallel_chains: usize,
    ignore_errors: bool,
) -> HammerConfig {
    HammerConfig {
        name: name.to_string(),
        description: desc.to_string(),
        bias,
        operations,
        max_parallel_chains,
        ignore_errors,
        ..HammerConfig::default()
    }
}

/// Built-in hammer profiles for common testing scenarios.
#[must_use]
pub fn builtin_profiles() -> HashMap<&'static str, HammerConfig> {
    use Entrypoint::{
        AddChain, AddPreChain, GetEntries, GetProofByHash, GetRoots, GetSth, GetSthConsistency,
    };

    HashMap::from([
        ("default", HammerConfig::default()),
        ("write-heavy", profile("write-heavy", "Mostly submissions with wide fan-out", bias(&[(AddChain, 50), (AddPreChain, 50), (GetSth, 2), (GetProofByHash, 1)]), 5_000, 8, true)),
        ("read-heavy", profile("read-heavy", "Mostly tree heads and entry reads", bias(&[(AddChain, 2), (GetSth, 20), (GetSthConsistency, 10), (GetEntries, 30), (GetRoots, 5)]), 5_000, 1, true)),
        ("proofs", profile("proofs", "Submissions interleaved with proof checks", bias(&[(AddChain, 10), (AddPreChain, 5), (GetSth, 10), (GetSthConsistency, 20), (GetProofByHash, 20)]), 2_000, 2, false)),
    ])
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error if the profile name is not found.
pub fn load_profile(name: &str) -> Result<HammerConfig, ConfigError> {
    builtin_profiles()
        .remove(name)
        .ok_or_else(|| ConfigError::NotFound {
            name: name.to_string(),
        })
}

/// List all available built-in profile names.
#[must_use]
pub fn list_profiles() -> Vec<&'static str> {
    let mut names: Vec<_> = builtin_profiles().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HammerConfig::default();
        assert_eq!(config.mmd(), Duration::from_secs(86_400));
        assert_eq!(config.max_retry(), Duration::from_secs(60));
        assert_eq!(config.bias.weight(Entrypoint::GetEntryAndProof), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builtin_profiles() {
        assert_eq!(list_profiles(), vec!["default", "proofs", "read-heavy", "write-heavy"]);
        for name in list_profiles() {
            let config = load_profile(name).unwrap();
            assert_eq!(config.name, name);
            assert!(config.validate().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_profile_not_found() {
        let result = load_profile("nonexistent");
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = load_profile("proofs").unwrap();
        let parsed = HammerConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log_prefix = \"testlog\"\noperations = 7\nignore_errors = true\n\n[bias]\nGetSTH = 3\nGetRoots = 1"
        )
        .unwrap();

        let config = HammerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_prefix, "testlog");
        assert_eq!(config.operations, 7);
        assert!(config.ignore_errors);
        assert_eq!(config.bias.weight(Entrypoint::GetSth), 3);
        assert_eq!(config.bias.weight(Entrypoint::AddChain), 0);
        assert_eq!(config.mmd_secs, DEFAULT_MMD_SECS);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = HammerConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_unknown_entrypoint_rejected() {
        let result = HammerConfig::from_toml("[bias]\nGetEverything = 1\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_unschedulable() {
        let config = HammerConfig {
            bias: bias(&[(Entrypoint::AddChain, 0)]),
            ..HammerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let config = HammerConfig {
            max_parallel_chains: 0,
            ..HammerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_emit_interval_uses_default() {
        let config = HammerConfig {
            emit_interval_secs: 0,
            ..HammerConfig::default()
        };
        assert_eq!(config.emit_interval(), Duration::from_secs(DEFAULT_EMIT_INTERVAL_SECS));
    }
}
