//! Error types for config loading and validation.

use thiserror::Error;

/// Errors returned while loading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a config file failed.
    #[error("failed to read config: {0}")]
    ReadFailed(#[from] std::io::Error),
    /// A config file is not valid JSON5.
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] json5::Error),
    /// The merged JSON value does not decode into the config model.
    #[error("failed to decode config: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    /// A field failed schema validation.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// The policy rule table would leave a condition unhandled or fail open.
    #[error("invalid policy rule table: {0}")]
    InvalidPolicy(String),
    /// A scope pattern is not a valid glob.
    #[error("invalid scope pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    /// Any other semantic validation failure.
    #[error("invalid config: {0}")]
    Invalid(String),
}
