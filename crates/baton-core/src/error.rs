//! Error types shared by the gateway crates.

use thiserror::Error;

/// A frame that could not be understood.
///
/// The channel that produced it is considered broken.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
}

/// Errors raised while loading `baton.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
