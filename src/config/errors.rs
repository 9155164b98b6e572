//! Configuration error types.

use thiserror::Error;

/// Errors that can occur while locating, reading, or validating the config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file was found.
    #[error("config file not found: {reason}")]
    NotFound { reason: String },

    /// The config file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// The file is not valid YAML for the expected schema.
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    /// The values parsed but are not usable.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}
