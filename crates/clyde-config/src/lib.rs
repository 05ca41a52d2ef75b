//! Clyde Configuration System
//!
//! User-level settings for resolution and builds:
//! - Global user configuration (~/.clydepm/config.toml)
//! - Environment overrides (CLYDE_*, CFLAGS)
//!
//! # Configuration Hierarchy
//!
//! Later sources override earlier ones:
//! 1. Built-in defaults
//! 2. Global config (~/.clydepm/config.toml)
//! 3. Environment variables
//!
//! # Example
//!
//! ```no_run
//! use clyde_config::ConfigLoader;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load().unwrap();
//! println!("building with {} jobs", config.jobs());
//! ```

pub mod global;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use global::{
    BuildSection, CompilerSection, GlobalConfig, ResolverPolicy, ResolverSection,
};
pub use loader::{CompilerSettings, Config, ConfigLoader};
