//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating, parsing, validating or writing a config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing or serialization failure.
    #[error("invalid config {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON parsing or serialization failure.
    #[error("invalid config {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// More than one recognized config file in a single directory.
    #[error("multiple configuration files in {}: {}", dir.display(), names.join(", "))]
    MultipleConfigFiles { dir: PathBuf, names: Vec<String> },

    /// The file name is not one of the recognized config names.
    #[error("unrecognized config file name: {}", .0.display())]
    UnrecognizedFileName(PathBuf),

    /// An exclude does not lie strictly inside the config directory.
    #[error("exclude {} is not within config directory {}", exclude.display(), dir.display())]
    ExcludeOutsideDir { exclude: PathBuf, dir: PathBuf },

    /// Semantic validation failure.
    #[error("invalid config {origin}: {message}")]
    Invalid { origin: String, message: String },
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
