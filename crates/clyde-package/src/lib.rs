//! Clyde package model
//!
//! Manifests for C/C++ packages, version constraints, manifest lookup,
//! dependency resolution into a validated graph, and lockfile generation.

pub mod constraint;
pub mod lockfile;
pub mod lookup;
pub mod manifest;
pub mod resolver;
pub mod validator;

pub use constraint::{ConstraintError, VersionConstraint};
pub use lockfile::{LockedPackage, Lockfile, LockfileMetadata, LOCKFILE_NAME};
pub use lookup::{InMemoryLookup, ManifestLookup, WorkspaceLookup};
pub use manifest::{DependencySpec, Manifest, PackageId, PackageKind, MANIFEST_FILE};
pub use resolver::{
    resolve, Conflict, DependencyEdge, DependencyGraph, Requirement, ResolveOptions, Resolver,
    ResolverError, ResolverResult, SelectionPolicy,
};
pub use validator::{ValidationError, Validator};

/// Package management errors
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize manifest: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    InvalidConstraint(#[from] ConstraintError),

    #[error("Invalid manifest at {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("Invalid lockfile: {0}")]
    InvalidLockfile(String),
}

pub type Result<T> = std::result::Result<T, PackageError>;
