//! Package lockfile (clyde.lock) for reproducible resolution

use crate::resolver::DependencyGraph;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Lockfile file name written next to the root manifest
pub const LOCKFILE_NAME: &str = "clyde.lock";

/// Lockfile structure (clyde.lock)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lockfile {
    /// Lockfile format version
    pub version: u32,
    /// Resolved packages
    #[serde(default)]
    pub packages: Vec<LockedPackage>,
    /// Metadata
    #[serde(default)]
    pub metadata: LockfileMetadata,
}

impl Lockfile {
    /// Current lockfile format version
    pub const VERSION: u32 = 1;

    /// Create new empty lockfile
    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            packages: Vec::new(),
            metadata: LockfileMetadata::default(),
        }
    }

    /// Record every package of a resolved graph
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let mut lockfile = Self::new();
        lockfile.metadata.clyde_version = Some(env!("CARGO_PKG_VERSION").to_string());
        lockfile.metadata.generated_at =
            Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

        for id in graph.packages() {
            let dependencies = graph
                .dependencies(id)
                .into_iter()
                .map(|dep| (dep.name.clone(), dep.version.clone()))
                .collect();
            lockfile.add_package(LockedPackage {
                name: id.name.clone(),
                version: id.version.clone(),
                dependencies,
            });
        }

        lockfile
    }

    /// Parse lockfile from TOML string
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load lockfile from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML string
    pub fn to_toml_string(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write lockfile to file
    pub fn write_to_file(&self, path: &Path) -> crate::Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Add or update a locked package
    pub fn add_package(&mut self, package: LockedPackage) {
        self.packages.retain(|p| p.name != package.name);
        self.packages.push(package);
        self.packages.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Get locked package by name
    pub fn get_package(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Remove package from lockfile
    pub fn remove_package(&mut self, name: &str) -> bool {
        let len = self.packages.len();
        self.packages.retain(|p| p.name != name);
        len != self.packages.len()
    }

    /// Verify lockfile integrity
    pub fn verify(&self) -> crate::Result<()> {
        if self.version > Self::VERSION {
            return Err(crate::PackageError::InvalidLockfile(format!(
                "version {} is newer than supported version {}",
                self.version,
                Self::VERSION
            )));
        }

        let mut seen = HashSet::new();
        for pkg in &self.packages {
            if !seen.insert(&pkg.name) {
                return Err(crate::PackageError::InvalidLockfile(format!(
                    "duplicate package {}",
                    pkg.name
                )));
            }
        }

        for pkg in &self.packages {
            for (dep, version) in &pkg.dependencies {
                match self.get_package(dep) {
                    Some(locked) if &locked.version == version => {}
                    _ => {
                        return Err(crate::PackageError::InvalidLockfile(format!(
                            "{} depends on {}@{} which is not locked",
                            pkg.name, dep, version
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether `graph` resolved to exactly the locked versions
    pub fn matches(&self, graph: &DependencyGraph) -> bool {
        graph.len() == self.packages.len()
            && graph.packages().all(|id| {
                self.get_package(&id.name)
                    .is_some_and(|p| p.version == id.version)
            })
    }
}

impl Default for Lockfile {
    fn default() -> Self {
        Self::new()
    }
}

/// Locked package entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockedPackage {
    /// Package name
    pub name: String,
    /// Resolved version
    pub version: Version,
    /// Direct dependencies (name -> version)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Version>,
}

/// Lockfile metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LockfileMetadata {
    /// When lockfile was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    /// Clyde version used to generate lockfile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clyde_version: Option<String>,
}
