//! warmpool.toml configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a working configuration. Values resolve as defaults, then the TOML
//! file, then `WARMPOOL_*` environment variables. Command-line flags are
//! applied on top by the binary.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ReservePolicy;

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "WARMPOOL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Minimum number of unoccupied instances to keep available.
    pub min_unoccupied_reserve: u32,
    /// Seconds between spawn attempts by the same instance.
    pub spawn_cooldown_secs: u64,
    /// Seconds an instance must stay idle before it may exit.
    pub shutdown_grace_period_secs: u64,
    /// Seconds between controller evaluations.
    pub tick_interval_secs: u64,
    /// Registry records without a heartbeat for this long are ignored.
    pub heartbeat_timeout_secs: u64,
    /// Shared registry database file.
    pub registry_path: PathBuf,
    /// Address the instance accepts its connection on.
    pub listen: String,
    /// Executable started for new siblings. Defaults to the running binary.
    pub executable: Option<PathBuf>,
    /// Arguments passed to new siblings. Defaults to this process's arguments.
    pub spawn_args: Option<Vec<String>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_unoccupied_reserve: 1,
            spawn_cooldown_secs: 5,
            shutdown_grace_period_secs: 120,
            tick_interval_secs: 2,
            heartbeat_timeout_secs: 30,
            registry_path: std::env::temp_dir().join("warmpool.redb"),
            listen: "127.0.0.1:0".to_string(),
            executable: None,
            spawn_args: None,
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to resolve `WARMPOOL_*` variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some(kv) = var("MIN_UNOCCUPIED_RESERVE") {
            self.min_unoccupied_reserve = parse_env(kv)?;
        }
        if let Some(kv) = var("SPAWN_COOLDOWN_SECS") {
            self.spawn_cooldown_secs = parse_env(kv)?;
        }
        if let Some(kv) = var("SHUTDOWN_GRACE_PERIOD_SECS") {
            self.shutdown_grace_period_secs = parse_env(kv)?;
        }
        if let Some(kv) = var("TICK_INTERVAL_SECS") {
            self.tick_interval_secs = parse_env(kv)?;
        }
        if let Some(kv) = var("HEARTBEAT_TIMEOUT_SECS") {
            self.heartbeat_timeout_secs = parse_env(kv)?;
        }
        if let Some((_, value)) = var("REGISTRY_PATH") {
            self.registry_path = PathBuf::from(value);
        }
        if let Some((_, value)) = var("LISTEN") {
            self.listen = value;
        }
        if let Some((_, value)) = var("EXECUTABLE") {
            self.executable = Some(PathBuf::from(value));
        }
        if let Some((_, value)) = var("SPAWN_ARGS") {
            // Whitespace separated; no shell quoting.
            self.spawn_args = Some(value.split_whitespace().map(str::to_string).collect());
        }
        Ok(())
    }

    /// Reject values the controller cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_unoccupied_reserve == 0 {
            return Err(ConfigError::Invalid(
                "min_unoccupied_reserve must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_timeout_secs <= self.tick_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_timeout_secs ({}) must exceed tick_interval_secs ({})",
                self.heartbeat_timeout_secs, self.tick_interval_secs
            )));
        }
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen address is empty".to_string()));
        }
        Ok(())
    }

    pub fn policy(&self) -> ReservePolicy {
        ReservePolicy {
            min_unoccupied_reserve: self.min_unoccupied_reserve,
            spawn_cooldown: Duration::from_secs(self.spawn_cooldown_secs),
            shutdown_grace_period: Duration::from_secs(self.shutdown_grace_period_secs),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Listen address handed to spawned siblings: same host, any free port.
    pub fn sibling_listen(&self) -> String {
        match self.listen.rsplit_once(':') {
            Some((host, _)) => format!("{host}:0"),
            None => format!("{}:0", self.listen),
        }
    }
}

fn parse_env<T: FromStr>((key, value): (String, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}
