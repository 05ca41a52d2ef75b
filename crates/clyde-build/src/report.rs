//! Build outcome reporting

use crate::artifact::Artifact;
use crate::error::CompileError;
use crate::fingerprint::Fingerprint;
use clyde_package::PackageId;
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Final status of one package in a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    /// Reused from the cache
    Cached,
    /// Compiled in this build
    Built,
    Failed { error: CompileError },
    /// Not attempted because a dependency failed
    Blocked { by: PackageId },
    /// Not attempted, or result discarded, because the build stopped
    Cancelled,
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Cached | Self::Built)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Built => "built",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed: {}", error.message),
            Self::Blocked { by } => write!(f, "blocked by {}", by),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeReport {
    pub package: PackageId,
    pub fingerprint: Fingerprint,
    pub status: NodeStatus,
    /// Present for cached and built packages
    pub artifact: Option<Artifact>,
    /// Wall time spent compiling (zero unless compiled)
    pub duration: Duration,
}

/// Per-status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub cached: usize,
    pub built: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} built, {} cached, {} failed, {} blocked, {} cancelled",
            self.built, self.cached, self.failed, self.blocked, self.cancelled
        )
    }
}

/// Outcome of a build, one entry per planned package in plan order
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub nodes: Vec<NodeReport>,
    pub total_time: Duration,
}

impl BuildReport {
    pub fn summary(&self) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for node in &self.nodes {
            match node.status {
                NodeStatus::Cached => summary.cached += 1,
                NodeStatus::Built => summary.built += 1,
                NodeStatus::Failed { .. } => summary.failed += 1,
                NodeStatus::Blocked { .. } => summary.blocked += 1,
                NodeStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Every package was built or reused
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_success())
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.package.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<&NodeStatus> {
        self.node(name).map(|n| &n.status)
    }

    pub fn artifact_of(&self, name: &str) -> Option<&Artifact> {
        self.node(name).and_then(|n| n.artifact.as_ref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CompileError> {
        self.nodes.iter().filter_map(|n| match &n.status {
            NodeStatus::Failed { error } => Some(error),
            _ => None,
        })
    }

    /// Machine-readable report
    pub fn to_json(&self) -> serde_json::Value {
        let summary = self.summary();
        let nodes: Vec<_> = self
            .nodes
            .iter()
            .map(|n| {
                let mut entry = json!({
                    "package": n.package.name,
                    "version": n.package.version.to_string(),
                    "fingerprint": n.fingerprint.as_str(),
                    "status": n.status.label(),
                    "duration_ms": n.duration.as_millis() as u64,
                });
                match &n.status {
                    NodeStatus::Failed { error } => entry["error"] = json!(error.message),
                    NodeStatus::Blocked { by } => entry["blocked_by"] = json!(by.to_string()),
                    _ => {}
                }
                if let Some(artifact) = &n.artifact {
                    entry["artifact"] = json!(artifact.location.display().to_string());
                }
                entry
            })
            .collect();

        json!({
            "success": self.is_success(),
            "summary": {
                "built": summary.built,
                "cached": summary.cached,
                "failed": summary.failed,
                "blocked": summary.blocked,
                "cancelled": summary.cancelled,
            },
            "total_time_ms": self.total_time.as_millis() as u64,
            "packages": nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::fingerprint::FingerprintHasher;
    use pretty_assertions::assert_eq;
    use semver::Version;

    fn report() -> BuildReport {
        let fp = FingerprintHasher::new().finish();
        let fmt = PackageId::new("fmt", Version::new(1, 0, 0));
        let log = PackageId::new("log", Version::new(0, 2, 0));
        let app = PackageId::new("app", Version::new(0, 1, 0));
        BuildReport {
            nodes: vec![
                NodeReport {
                    package: fmt.clone(),
                    fingerprint: fp.clone(),
                    status: NodeStatus::Cached,
                    artifact: Some(Artifact::new(
                        fmt.clone(),
                        fp.clone(),
                        "/cache/libfmt.a",
                        ArtifactKind::StaticLibrary,
                    )),
                    duration: Duration::ZERO,
                },
                NodeReport {
                    package: log.clone(),
                    fingerprint: fp.clone(),
                    status: NodeStatus::Failed {
                        error: CompileError::new(log.clone(), "log.c:3: syntax error"),
                    },
                    artifact: None,
                    duration: Duration::from_millis(12),
                },
                NodeReport {
                    package: app,
                    fingerprint: fp,
                    status: NodeStatus::Blocked { by: log },
                    artifact: None,
                    duration: Duration::ZERO,
                },
            ],
            total_time: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_summary() {
        let report = report();
        let summary = report.summary();
        assert_eq!(
            summary,
            BuildSummary {
                cached: 1,
                failed: 1,
                blocked: 1,
                ..Default::default()
            }
        );
        assert_eq!(
            summary.to_string(),
            "0 built, 1 cached, 1 failed, 1 blocked, 0 cancelled"
        );
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_lookup_by_name() {
        let report = report();
        assert_eq!(report.status_of("fmt"), Some(&NodeStatus::Cached));
        assert_eq!(
            report.status_of("app").map(ToString::to_string).as_deref(),
            Some("blocked by log@0.2.0")
        );
        assert!(report.artifact_of("fmt").is_some());
        assert!(report.artifact_of("log").is_none());
        assert!(report.status_of("missing").is_none());
    }

    #[test]
    fn test_json_report() {
        let json = report().to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["packages"][0]["artifact"], "/cache/libfmt.a");
        assert_eq!(json["packages"][1]["error"], "log.c:3: syntax error");
        assert_eq!(json["packages"][2]["blocked_by"], "log@0.2.0");
    }
}
