//! Error types for the stub server.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating stub configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("stub '{id}': {reason}")]
    InvalidStub { id: String, reason: String },

    #[error("invalid regex '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid status code: {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Body(String),
}

/// Errors raised by the running server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised while verifying the request journal.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The journal holds a different number of matching requests than expected.
    #[error("expected {expected} request(s) matching {pattern} but received {actual} (journal holds {total})")]
    CountMismatch {
        expected: String,
        actual: usize,
        total: usize,
        pattern: String,
    },

    #[error("invalid verification pattern: {0}")]
    InvalidPattern(#[from] ConfigError),
}
