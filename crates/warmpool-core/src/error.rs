//! Error types shared by warmpool crates.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for registry reads.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A registry read that could not be served.
///
/// The controller treats every variant the same way: no action this tick.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry busy: {0}")]
    Busy(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
