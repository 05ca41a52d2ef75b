//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::{validate_jobs, GlobalConfig, ResolverPolicy};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding `build.jobs`
pub const ENV_JOBS: &str = "CLYDE_JOBS";
/// Environment variable overriding `build.keep_going`
pub const ENV_KEEP_GOING: &str = "CLYDE_KEEP_GOING";
/// Environment variable overriding `build.cache_dir`
pub const ENV_CACHE_DIR: &str = "CLYDE_CACHE_DIR";
/// Extra compile flags, appended after `compiler.cflags`
pub const ENV_CFLAGS: &str = "CFLAGS";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Global config (~/.clydepm/config.toml) - overrides defaults
/// 3. Environment variables - overrides global config
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration with environment overrides applied
    pub global: GlobalConfig,

    /// Flags taken from `CFLAGS`
    pub env_cflags: Vec<String>,

    /// File the global configuration was read from, if any
    pub config_path: Option<PathBuf>,
}

/// Effective toolchain identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    pub name: String,
    pub version: String,
    pub target: String,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Read the global configuration from `path` instead of the home directory
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load the global configuration and apply environment overrides
    pub fn load(&mut self) -> ConfigResult<Config> {
        let (global, config_path) = self.load_global_config()?;
        let (global, env_cflags) = self.apply_env_overrides(global)?;

        Ok(Config {
            global,
            env_cflags,
            config_path,
        })
    }

    /// Load global configuration; a missing file yields defaults
    fn load_global_config(&mut self) -> ConfigResult<(GlobalConfig, Option<PathBuf>)> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok((GlobalConfig::default(), None)),
                Err(e) => return Err(e),
            }
        }

        let Some(path) = self.global_config_path.as_ref() else {
            return Ok((GlobalConfig::default(), None));
        };

        if !path.exists() {
            return Ok((GlobalConfig::default(), None));
        }

        let config = GlobalConfig::load_from_file(path)?;
        Ok((config, Some(path.clone())))
    }

    /// Apply environment variable overrides to the global config
    fn apply_env_overrides(
        &self,
        mut config: GlobalConfig,
    ) -> ConfigResult<(GlobalConfig, Vec<String>)> {
        if let Ok(jobs) = env::var(ENV_JOBS) {
            let parsed = jobs.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                field: ENV_JOBS.to_string(),
                reason: format!("expected a positive integer, got '{}'", jobs),
            })?;
            validate_jobs(ENV_JOBS, parsed)?;
            config.build.get_or_insert_with(Default::default).jobs = Some(parsed);
        }

        if let Ok(keep_going) = env::var(ENV_KEEP_GOING) {
            let keep_going = matches!(keep_going.to_lowercase().as_str(), "true" | "1" | "yes");
            config.build.get_or_insert_with(Default::default).keep_going = Some(keep_going);
        }

        if let Ok(dir) = env::var(ENV_CACHE_DIR) {
            if !dir.is_empty() {
                config.build.get_or_insert_with(Default::default).cache_dir =
                    Some(PathBuf::from(dir));
            }
        }

        let env_cflags = env::var(ENV_CFLAGS)
            .map(|flags| flags.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok((config, env_cflags))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Maximum simultaneous compile invocations
    ///
    /// Defaults to the available parallelism of the machine.
    pub fn jobs(&self) -> usize {
        self.global
            .build
            .as_ref()
            .and_then(|b| b.jobs)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Keep building independent packages after a failure
    pub fn keep_going(&self) -> bool {
        self.global
            .build
            .as_ref()
            .and_then(|b| b.keep_going)
            .unwrap_or(false)
    }

    /// Artifact cache directory (default: ~/.clydepm/cache)
    pub fn cache_dir(&self) -> ConfigResult<PathBuf> {
        match self.global.build.as_ref().and_then(|b| b.cache_dir.clone()) {
            Some(dir) => Ok(dir),
            None => Ok(GlobalConfig::global_config_dir()?.join("cache")),
        }
    }

    /// Configured compile flags followed by `CFLAGS`
    pub fn cflags(&self) -> Vec<String> {
        let mut flags: Vec<String> = self
            .global
            .compiler
            .as_ref()
            .and_then(|c| c.cflags.clone())
            .unwrap_or_default();
        flags.extend(self.env_cflags.iter().cloned());
        flags
    }

    /// Toolchain identity (default: gcc with unknown version and host target)
    pub fn compiler(&self) -> CompilerSettings {
        let section = self.global.compiler.clone().unwrap_or_default();
        CompilerSettings {
            name: section.name.unwrap_or_else(|| "gcc".to_string()),
            version: section.version.unwrap_or_default(),
            target: section.target.unwrap_or_else(|| "host".to_string()),
        }
    }

    pub fn resolver_policy(&self) -> ResolverPolicy {
        self.global
            .resolver
            .as_ref()
            .and_then(|r| r.policy)
            .unwrap_or_default()
    }

    /// File the settings were read from
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}
