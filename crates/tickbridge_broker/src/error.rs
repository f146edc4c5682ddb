//! # Broker Error Types
//!
//! All errors that can occur talking to a broker or loading its config.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`BrokerClient`](crate::BrokerClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached at all.
    #[error("broker unreachable at {address}: {reason}")]
    Unreachable {
        /// Host and port that were tried.
        address: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The broker refused the connection (bad credentials, no vhost access).
    #[error("broker rejected the connection: {0}")]
    Rejected(String),

    /// The operation needs an open connection and there is none.
    #[error("not connected to the broker")]
    NotConnected,

    /// `open` was called on a client that is already open.
    #[error("broker client is already open")]
    AlreadyOpen,

    /// Declaring, binding, consuming or publishing failed.
    #[error("broker operation `{operation}` failed: {reason}")]
    Operation {
        /// What was being attempted.
        operation: &'static str,
        /// Reason reported by the client library.
        reason: String,
    },

    /// The client's async runtime could not be started.
    #[error("failed to start broker runtime: {0}")]
    Runtime(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config is not valid TOML for the expected shape.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but its values are unusable.
    #[error("invalid config value: {0}")]
    Invalid(String),
}
