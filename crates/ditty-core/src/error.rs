//! Error types for ditty-core

use thiserror::Error;

/// Result type alias for ditty-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ditty-core
#[derive(Debug, Error)]
pub enum Error {
    /// A loop was given a length that cannot describe a cycle
    #[error("Invalid length {length} for loop '{id}': must be a finite number of beats > 0")]
    InvalidLength { id: String, length: f64 },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Loop file error
    #[error("Loop file error: {0}")]
    LoopFile(String),

    /// Runtime thread error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The runtime thread is gone and can no longer receive messages
    #[error("Runtime channel disconnected")]
    Disconnected,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
