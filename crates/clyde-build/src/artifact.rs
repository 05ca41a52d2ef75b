/// Build artifact types
use crate::fingerprint::Fingerprint;
use clyde_package::{PackageId, PackageKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of compiled output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Static archive (`lib<name>.a`)
    StaticLibrary,
    /// Shared object (`lib<name>.so`)
    SharedLibrary,
    /// Linked program
    Executable,
}

impl ArtifactKind {
    /// Artifact kind produced by a package kind
    pub fn for_package(kind: PackageKind) -> Self {
        match kind {
            PackageKind::Library => Self::StaticLibrary,
            PackageKind::SharedLibrary => Self::SharedLibrary,
            PackageKind::Executable => Self::Executable,
        }
    }

    /// Get the conventional output directory name for this kind
    pub fn output_dir_name(&self) -> &'static str {
        match self {
            Self::StaticLibrary | Self::SharedLibrary => "lib",
            Self::Executable => "bin",
        }
    }

    /// Conventional file name for a package's artifact
    ///
    /// Scoped names drop the `@` and join their parts with `_`.
    pub fn file_name(&self, package: &str) -> String {
        let stem = package.trim_start_matches('@').replace('/', "_");
        match self {
            Self::StaticLibrary => format!("lib{}.a", stem),
            Self::SharedLibrary => format!("lib{}.so", stem),
            Self::Executable => stem,
        }
    }

    /// Whether dependents link against this artifact
    pub fn is_linkable(&self) -> bool {
        matches!(self, Self::StaticLibrary | Self::SharedLibrary)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaticLibrary => write!(f, "static-library"),
            Self::SharedLibrary => write!(f, "shared-library"),
            Self::Executable => write!(f, "executable"),
        }
    }
}

/// Output of one successful package build
///
/// Never mutated once produced; a new fingerprint yields a new artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub package: PackageId,
    pub fingerprint: Fingerprint,
    /// File holding the compiled output
    pub location: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new(
        package: PackageId,
        fingerprint: Fingerprint,
        location: impl Into<PathBuf>,
        kind: ArtifactKind,
    ) -> Self {
        Self {
            package,
            fingerprint,
            location: location.into(),
            kind,
        }
    }

    /// Same artifact stored somewhere else
    pub fn relocated(&self, location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            ..self.clone()
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}
