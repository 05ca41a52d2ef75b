//! Global Configuration (~/.clydepm/config.toml)
//!
//! Handles user-level configuration stored in `~/.clydepm/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound accepted for `build.jobs`
pub const MAX_JOBS: usize = 1024;

/// Global user configuration from ~/.clydepm/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Build scheduling settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// Toolchain identity and default flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerSection>,

    /// Dependency resolution settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverSection>,
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Maximum simultaneous compile invocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Keep building independent packages after a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_going: Option<bool>,

    /// Artifact cache directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// `[compiler]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CompilerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Target triple
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Flags passed to every compile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cflags: Option<Vec<String>>,
}

/// `[resolver]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ResolverSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<ResolverPolicy>,
}

/// How the resolver picks among satisfying versions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverPolicy {
    #[default]
    Highest,
    FirstFound,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(build) = &self.build {
            if let Some(jobs) = build.jobs {
                validate_jobs("build.jobs", jobs)?;
            }
            if let Some(dir) = &build.cache_dir {
                if dir.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "build.cache_dir".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
        }

        if let Some(compiler) = &self.compiler {
            if let Some(name) = &compiler.name {
                if name.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "compiler.name".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
            if let Some(flags) = &compiler.cflags {
                if let Some(flag) = flags.iter().find(|f| f.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: "compiler.cflags".to_string(),
                        reason: format!("empty flag '{}'", flag),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the global config directory (~/.clydepm)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".clydepm"))
    }

    /// Get the global config file path (~/.clydepm/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        Ok(Self::global_config_dir()?.join("config.toml"))
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if let Some(other_build) = &other.build {
            let build = self.build.get_or_insert_with(Default::default);
            if other_build.jobs.is_some() {
                build.jobs = other_build.jobs;
            }
            if other_build.keep_going.is_some() {
                build.keep_going = other_build.keep_going;
            }
            if other_build.cache_dir.is_some() {
                build.cache_dir = other_build.cache_dir.clone();
            }
        }
        if let Some(other_compiler) = &other.compiler {
            let compiler = self.compiler.get_or_insert_with(Default::default);
            if other_compiler.name.is_some() {
                compiler.name = other_compiler.name.clone();
            }
            if other_compiler.version.is_some() {
                compiler.version = other_compiler.version.clone();
            }
            if other_compiler.target.is_some() {
                compiler.target = other_compiler.target.clone();
            }
            if other_compiler.cflags.is_some() {
                compiler.cflags = other_compiler.cflags.clone();
            }
        }
        if other.resolver.is_some() {
            self.resolver = other.resolver.clone();
        }
    }
}

/// Validate a job count
pub(crate) fn validate_jobs(field: &str, jobs: usize) -> ConfigResult<()> {
    if jobs == 0 || jobs > MAX_JOBS {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be between 1 and {}, got {}", MAX_JOBS, jobs),
        });
    }
    Ok(())
}
