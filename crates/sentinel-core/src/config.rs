//! Ambient engine configuration.
//!
//! Loaded from TOML by the CLI binary; library callers can construct a
//! `EngineConfig` directly or start from `EngineConfig::default()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for an `ExecutionEngine` instance.
///
/// None of these affect correctness of a single run; they bound resource
/// usage and provide defaults when a `StackSpec` or `ExecuteStack` call
/// does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of nodes the scheduler will dispatch concurrently in
    /// parallel mode. `1` degrades to fully sequential execution.
    pub max_parallelism: usize,

    /// Default wall-clock budget for a run whose options ask for it
    /// explicitly (`RunTimeout::UseEngineDefault`); a run can still opt out
    /// of any deadline entirely via `RunTimeout::None`.
    #[serde(with = "humantime_duration")]
    pub default_timeout: Duration,

    /// Number of completed `ExecutionRecord`s retained per stack by the
    /// in-memory history store before the oldest are evicted.
    pub max_history_per_stack: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            default_timeout: Duration::from_secs(300),
            max_history_per_stack: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML text, falling back to defaults for any
    /// field the document omits.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// (De)serializes a `Duration` as a plain seconds count, matching the unit
/// the rest of the engine uses for deadlines.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_parallelism, 4);
        assert_eq!(cfg.max_history_per_stack, 100);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = EngineConfig::from_toml("max_parallelism = 8\n").unwrap();
        assert_eq!(cfg.max_parallelism, 8);
        assert_eq!(cfg.default_timeout, Duration::from_secs(300));
    }

    #[test]
    fn full_toml_roundtrips() {
        let cfg = EngineConfig::from_toml(
            "max_parallelism = 2\ndefault_timeout = 60\nmax_history_per_stack = 10\n",
        )
        .unwrap();
        assert_eq!(cfg.default_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_history_per_stack, 10);
    }
}
