//! Clyde build system infrastructure
//!
//! Turns a resolved dependency graph into compiled artifacts:
//! - Content fingerprints over sources, headers, flags and dependencies
//! - A content-addressed artifact cache (in memory or on disk)
//! - Build plans that mark each package cached or stale
//! - A bounded-parallelism scheduler with failure propagation and cancellation

pub mod artifact;
pub mod builder;
pub mod cache;
pub mod compiler;
pub mod error;
pub mod fingerprint;
pub mod planner;
pub mod report;
pub mod scheduler;

// Re-export main types
pub use artifact::{Artifact, ArtifactKind};
pub use builder::{BuildConfig, Builder};
pub use cache::{ArtifactCache, CacheBackend, CacheStats, FsBackend, MemoryBackend};
pub use compiler::{CompileRequest, Compiler};
pub use error::{BuildError, BuildResult, CacheError, CompileError};
pub use fingerprint::{
    compute_fingerprint, BuildFlags, CompilerInfo, Fingerprint, FingerprintHasher,
    FingerprintInputs, FsSourceHasher, SourceHasher,
};
pub use planner::{BuildNode, BuildPlan, NodeState, Planner};
pub use report::{BuildReport, BuildSummary, NodeReport, NodeStatus};
pub use scheduler::{
    BuildEvent, CancelHandle, EventObserver, FailurePolicy, Scheduler, SchedulerConfig,
};

// Re-export clyde-package types for convenience
pub use clyde_package::{DependencyGraph, Manifest, PackageId};
