//! Error types for discovery, toolchain management and compilation.

use std::path::{Path, PathBuf};

use protoforge_config::ConfigError;
use protoforge_core::DescriptorError;
use thiserror::Error;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while building a project snapshot.
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal failure.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The target is not a directory.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A file argument is not a `.proto` file.
    #[error("{} is not a .proto file", .0.display())]
    NotProtoFile(PathBuf),

    /// The walk did not finish before the deadline.
    #[error(
        "timed out after visiting {visited} directories under {}; you may be running outside of the intended project, try a directory containing protoforge.yaml or raise --walk-timeout-ms",
        root.display()
    )]
    WalkTimeout { visited: usize, root: PathBuf },

    /// Nested config files govern `.proto` files inside this project.
    #[error(
        "multiple configuration files govern files under this project; nested configs found in: {}",
        join_paths(.0)
    )]
    MultipleConfigs(Vec<PathBuf>),

    /// Explicit file arguments resolve to different configs.
    #[error(
        "files are governed by different configs: {} and {}",
        first.display(),
        second.display()
    )]
    ConfigMismatch { first: PathBuf, second: PathBuf },

    /// Interrupted before the walk finished.
    #[error("cancelled while scanning for .proto files")]
    Cancelled,
}

/// Errors raised by the toolchain cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem I/O failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No cache location could be derived from the environment.
    #[error("could not determine a cache directory: HOME is not set")]
    NoHomeDir,

    /// Only one of the binary and include overrides was given.
    #[error("protoc binary path and well-known types path must be set together")]
    PartialOverride,

    /// The host has no published compiler build.
    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The archive could not be fetched.
    #[error("failed to download {url}: {message}; {hint}")]
    Download {
        url: String,
        message: String,
        hint: &'static str,
    },

    /// The archive could not be read or has the wrong layout.
    #[error("invalid protoc archive from {url}: {message}; {hint}")]
    Archive {
        url: String,
        message: String,
        hint: &'static str,
    },

    /// The installed binary reported a different version.
    #[error("protoc version mismatch: expected {expected:?}, got {actual:?}")]
    VersionMismatch { expected: String, actual: String },

    /// The installed binary could not be run for verification.
    #[error("failed to verify {}: {message}", path.display())]
    Verify { path: PathBuf, message: String },

    /// Another process held the install lock for too long.
    #[error("timed out after {waited_secs}s waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_secs: u64 },

    /// Interrupted before the install finished.
    #[error("cancelled while installing protoc into {}", path.display())]
    Cancelled { path: PathBuf },

    /// The install record could not be written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors raised while planning or running `protoc`.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `protoc` could not be started.
    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `protoc` failed without printing anything the parser understood.
    #[error("protoc exited with {status}: {stderr}")]
    ProtocFailed { status: String, stderr: String },

    /// The run was interrupted.
    #[error("cancelled")]
    Cancelled,

    /// The worker pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    /// SIGINT/SIGTERM handling could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Convenience alias for results with [`CompileError`].
pub type Result<T> = std::result::Result<T, CompileError>;
