//! Content fingerprints for build inputs
//!
//! A package fingerprint covers its own sources and headers, the effective
//! build flags, and the fingerprints of its dependencies, so any change deep
//! in the graph changes every ancestor's fingerprint.

use crate::error::{BuildError, BuildResult};
use clyde_package::{Manifest, PackageId};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Bumped whenever the fingerprint layout changes
const FINGERPRINT_VERSION: &str = "clyde-fingerprint-v1";

/// Lowercase hex SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a 64 character lowercase hex digest
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs and directory names
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental SHA-256 over labelled, length-prefixed fields
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
pub struct FingerprintHasher(Sha256);

impl FingerprintHasher {
    pub fn new() -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field("version", FINGERPRINT_VERSION);
        hasher
    }

    pub fn field(&mut self, label: &str, value: impl AsRef<[u8]>) -> &mut Self {
        let value = value.as_ref();
        self.0.update(label.as_bytes());
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value);
        self
    }

    pub fn finish(self) -> Fingerprint {
        let digest = self.0.finalize();
        Fingerprint(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Toolchain identity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub name: String,
    pub version: String,
    pub target: String,
}

impl CompilerInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            target: target.into(),
        }
    }
}

/// Build settings shared by every package in a build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildFlags {
    pub compiler: CompilerInfo,
    /// Compile flags, order preserved
    pub cflags: Vec<String>,
    pub traits: BTreeMap<String, String>,
}

impl BuildFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiler(mut self, compiler: CompilerInfo) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_cflags(mut self, cflags: Vec<String>) -> Self {
        self.cflags = cflags;
        self
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    /// Digest of every field
    pub fn digest(&self) -> Fingerprint {
        let mut hasher = FingerprintHasher::new();
        hasher
            .field("compiler.name", &self.compiler.name)
            .field("compiler.version", &self.compiler.version)
            .field("compiler.target", &self.compiler.target);
        for flag in &self.cflags {
            hasher.field("cflag", flag);
        }
        for (key, value) in &self.traits {
            hasher.field("trait.key", key).field("trait.value", value);
        }
        hasher.finish()
    }

    /// Flags for one package: global flags first, then the manifest's;
    /// manifest traits override global ones
    pub fn merged_with(&self, manifest: &Manifest) -> BuildFlags {
        let mut merged = self.clone();
        merged.cflags.extend(manifest.cflags.iter().cloned());
        for (key, value) in &manifest.traits {
            merged.traits.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Hashes the files a package build reads
pub trait SourceHasher: Send + Sync {
    fn hash_sources(&self, manifest: &Manifest) -> BuildResult<Fingerprint>;
}

/// Hashes declared sources and every file under declared include directories
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceHasher;

impl FsSourceHasher {
    fn hash_file(hasher: &mut FingerprintHasher, label: &str, rel: &Path, abs: &Path) -> BuildResult<()> {
        let content = std::fs::read(abs).map_err(|e| BuildError::io(abs, e))?;
        hasher
            .field(label, rel.to_string_lossy().as_bytes())
            .field("content", &content);
        Ok(())
    }
}

impl SourceHasher for FsSourceHasher {
    fn hash_sources(&self, manifest: &Manifest) -> BuildResult<Fingerprint> {
        let mut hasher = FingerprintHasher::new();

        for source in &manifest.sources {
            Self::hash_file(&mut hasher, "source", source, &manifest.root.join(source))?;
        }

        for include in &manifest.include_dirs {
            let dir = manifest.root.join(include);
            if !dir.exists() {
                debug!("{}: include directory {} does not exist", manifest.id(), dir.display());
                continue;
            }
            for entry in WalkDir::new(&dir).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                    BuildError::io(path, e.into())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&manifest.root).unwrap_or(entry.path());
                Self::hash_file(&mut hasher, "header", rel, entry.path())?;
            }
        }

        Ok(hasher.finish())
    }
}

/// Everything besides the graph that feeds fingerprints
#[derive(Clone)]
pub struct FingerprintInputs {
    pub flags: BuildFlags,
    pub hasher: Arc<dyn SourceHasher>,
}

impl FingerprintInputs {
    pub fn new(flags: BuildFlags) -> Self {
        Self {
            flags,
            hasher: Arc::new(FsSourceHasher),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn SourceHasher>) -> Self {
        self.hasher = hasher;
        self
    }
}

impl Default for FingerprintInputs {
    fn default() -> Self {
        Self::new(BuildFlags::default())
    }
}

impl fmt::Debug for FingerprintInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintInputs")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Combine one package's inputs into its fingerprint
///
/// `dependencies` must already be sorted by `PackageId`.
pub fn compute_fingerprint(
    manifest: &Manifest,
    source_digest: &Fingerprint,
    flags_digest: &Fingerprint,
    dependencies: &[(&PackageId, &Fingerprint)],
) -> Fingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher
        .field("package", manifest.id().to_string())
        .field("kind", manifest.kind.to_string());
    for flag in &manifest.cflags {
        hasher.field("package.cflag", flag);
    }
    for (key, value) in &manifest.traits {
        hasher.field("package.trait.key", key).field("package.trait.value", value);
    }
    hasher
        .field("sources", source_digest.as_str())
        .field("flags", flags_digest.as_str());
    for (id, fingerprint) in dependencies {
        hasher
            .field("dependency", id.to_string())
            .field("dependency.fingerprint", fingerprint.as_str());
    }
    hasher.finish()
}
