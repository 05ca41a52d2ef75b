//! The compile step the scheduler drives

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::CompileError;
use crate::fingerprint::{BuildFlags, Fingerprint};
use clyde_package::{PackageId, PackageKind};
use std::path::PathBuf;

/// Everything needed to compile and link one package
///
/// Paths are absolute. Include directories list the package's own
/// directories first, then those of its transitive dependencies in plan
/// order; `dependency_artifacts` follows the same order.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub package: PackageId,
    pub kind: PackageKind,
    pub fingerprint: Fingerprint,
    pub root: PathBuf,
    pub sources: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    /// Linkable outputs of transitive dependencies
    pub dependency_artifacts: Vec<Artifact>,
    /// Global flags merged with the package's own
    pub flags: BuildFlags,
}

impl CompileRequest {
    pub fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::for_package(self.kind)
    }

    /// Conventional output file name for this package
    pub fn output_file_name(&self) -> String {
        self.artifact_kind().file_name(&self.package.name)
    }

    /// Artifact for this request stored at `location`
    pub fn artifact(&self, location: impl Into<PathBuf>) -> Artifact {
        Artifact::new(
            self.package.clone(),
            self.fingerprint.clone(),
            location,
            self.artifact_kind(),
        )
    }

    pub fn fail(&self, message: impl ToString) -> CompileError {
        CompileError::new(self.package.clone(), message)
    }
}

/// Turns one package's sources into an artifact
///
/// Called from worker threads, possibly several at once.
pub trait Compiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<Artifact, CompileError>;
}

impl<F> Compiler for F
where
    F: Fn(&CompileRequest) -> Result<Artifact, CompileError> + Send + Sync,
{
    fn compile(&self, request: &CompileRequest) -> Result<Artifact, CompileError> {
        self(request)
    }
}
