/// Build system error types
use clyde_package::{PackageId, ResolverError};
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Dependency resolution failed: {0}")]
    Resolution(#[from] ResolverError),

    #[error("Build cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] clyde_config::ConfigError),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Failed to start build workers: {0}")]
    ThreadPool(String),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }

    /// Create an invalid graph error
    pub fn invalid_graph(reason: impl ToString) -> Self {
        Self::InvalidGraph(reason.to_string())
    }
}

/// Artifact cache failures
///
/// Never fatal to a build: lookups that fail are treated as misses and
/// failed stores only lose the cache entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Corrupt cache index {path}: {reason}")]
    Index { path: PathBuf, reason: String },

    #[error("Cache lock poisoned")]
    Poisoned,
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

/// Compile or link failure of one package
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compilation failed for package '{package}': {message}")]
pub struct CompileError {
    pub package: PackageId,
    pub message: String,
}

impl CompileError {
    pub fn new(package: PackageId, message: impl ToString) -> Self {
        Self {
            package,
            message: message.to_string(),
        }
    }
}
