//! Conflict reporting for dependency resolution

use crate::constraint::VersionConstraint;
use crate::manifest::PackageId;
use semver::Version;
use std::fmt;

/// One constraint placed on a package, with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub constraint: VersionConstraint,
    /// Package whose manifest declared the dependency
    pub requested_by: PackageId,
    /// Packages from the root down to `requested_by`
    pub path: Vec<PackageId>,
}

impl Requirement {
    pub fn new(constraint: VersionConstraint, requested_by: PackageId, path: Vec<PackageId>) -> Self {
        Self {
            constraint,
            requested_by,
            path,
        }
    }

    /// Render the path as `a@1.0.0 -> b@1.2.0`
    pub fn path_display(&self) -> String {
        display_path(&self.path)
    }
}

/// Join package ids with arrows
pub(crate) fn display_path(path: &[PackageId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// No single version of a package satisfies every requirement on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub package: String,
    pub requirements: Vec<Requirement>,
    /// Versions the lookup offered, ascending
    pub available: Vec<Version>,
}

impl Conflict {
    pub fn new(package: impl Into<String>, requirements: Vec<Requirement>) -> Self {
        Self {
            package: package.into(),
            requirements,
            available: Vec::new(),
        }
    }

    pub fn with_available(mut self, mut available: Vec<Version>) -> Self {
        available.sort();
        available.dedup();
        self.available = available;
        self
    }

    /// Generate human-readable conflict report
    pub fn report(&self) -> String {
        let mut lines = vec![format!("Version conflict for package '{}':", self.package)];

        for req in &self.requirements {
            lines.push(format!("  {} requires {}", req.path_display(), req.constraint));
        }

        if !self.available.is_empty() {
            let versions: Vec<String> = self.available.iter().map(ToString::to_string).collect();
            lines.push(format!("Available versions: {}", versions.join(", ")));
        }

        lines.push(String::new());
        lines.push("Possible solutions:".to_string());
        lines.push(
            "  1. Relax one of the constraints above so a single version satisfies all of them"
                .to_string(),
        );
        lines.push(format!(
            "  2. Make a compatible version of '{}' available",
            self.package
        ));

        lines.join("\n")
    }

    /// Get the number of conflicting requirements
    pub fn constraint_count(&self) -> usize {
        self.requirements.len()
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| format!("{} (from {})", r.constraint, r.requested_by))
            .collect();
        write!(
            f,
            "no version of '{}' satisfies {}",
            self.package,
            parts.join(", ")
        )
    }
}
