//! A runtime configuration struct that doubles as a CLI parser (`clap`)
//! and a JSON document (`serde`), the way a component's init parameters
//! can be supplied from either a command line or a saved config file.

use std::fs;
use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to serialize config to JSON: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Top-level settings for running a graph as a standalone process.
///
/// Every field has a `clap` flag and a `serde` key, so the same struct
/// parses `--log-directive flowgraph_core=debug` from argv and round-trips
/// through a saved JSON file.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(author, version, about)]
pub struct RuntimeConfig {
    /// `tracing` filter directive, e.g. "flowgraph_core=debug,warn".
    #[arg(long, default_value = "flowgraph_core=info")]
    #[serde(default = "default_log_directive")]
    pub log_directive: String,

    /// Snapshot polling interval, in milliseconds, for a process that
    /// periodically prints `Graph::collect_metrics`.
    #[arg(long, default_value_t = 1000)]
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Path to a JSON config file to load in place of (and then override
    /// with) CLI flags. Optional: a binary can run entirely off defaults
    /// and flags.
    #[arg(long)]
    #[serde(skip)]
    pub config_path: Option<String>,
}

fn default_log_directive() -> String {
    "flowgraph_core=info".to_string()
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_directive: default_log_directive(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            config_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(ConfigError::Parse)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Parses `args`, and if `--config-path` was given, loads that file as
    /// the base configuration instead of the CLI-parsed defaults (the file
    /// wins over unspecified flags; give it no further merge logic). Either
    /// way, `config_path` on the returned value reflects what was passed on
    /// the command line.
    pub fn load_layered(args: &[String]) -> Result<Self, ConfigError> {
        let cli = Self::parse_from(args);
        match &cli.config_path {
            Some(path) => {
                let mut merged = Self::from_json(path)?;
                merged.config_path = cli.config_path.clone();
                Ok(merged)
            }
            None => Ok(cli),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.log_directive, "flowgraph_core=info");
        assert_eq!(config.snapshot_interval_ms, 1000);
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let dir = std::env::temp_dir().join(format!("flowgraph-native-test-{:?}", std::thread::current().id()));
        let path = dir.join("config.json");

        let mut config = RuntimeConfig::default();
        config.snapshot_interval_ms = 2500;
        config.save_json(&path).unwrap();

        let loaded = RuntimeConfig::from_json(&path).unwrap();
        assert_eq!(loaded.snapshot_interval_ms, 2500);

        let _ = fs::remove_dir_all(&dir);
    }
}
