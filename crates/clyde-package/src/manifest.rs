//! Package manifest parsing and types (clyde.toml)

use crate::constraint::VersionConstraint;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Manifest file name looked up inside a package directory
pub const MANIFEST_FILE: &str = "clyde.toml";

/// Identity of one resolved package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: Version,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// What a package produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageKind {
    /// Static archive other packages link against
    #[default]
    Library,
    /// Shared object other packages link against
    SharedLibrary,
    /// Linked program
    #[serde(alias = "application")]
    Executable,
}

impl PackageKind {
    /// Whether dependents link against this package's artifact
    pub fn is_library(&self) -> bool {
        matches!(self, Self::Library | Self::SharedLibrary)
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => write!(f, "library"),
            Self::SharedLibrary => write!(f, "shared-library"),
            Self::Executable => write!(f, "executable"),
        }
    }
}

/// One declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }
}

/// In-memory package manifest
///
/// Read-only once handed to the resolver. Relative source and include paths
/// are resolved against `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: Version,
    pub kind: PackageKind,
    pub dependencies: Vec<DependencySpec>,
    pub sources: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub cflags: Vec<String>,
    pub traits: BTreeMap<String, String>,
    pub root: PathBuf,
}

impl Manifest {
    /// Create a library manifest with no dependencies or files
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            kind: PackageKind::Library,
            dependencies: Vec::new(),
            sources: Vec::new(),
            include_dirs: Vec::new(),
            cflags: Vec::new(),
            traits: BTreeMap::new(),
            root: PathBuf::new(),
        }
    }

    /// Identity of this manifest
    pub fn id(&self) -> PackageId {
        PackageId::new(self.name.clone(), self.version.clone())
    }

    pub fn with_kind(mut self, kind: PackageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a dependency, parsing its constraint
    pub fn with_dependency(
        mut self,
        name: impl Into<String>,
        constraint: &str,
    ) -> crate::Result<Self> {
        let constraint = VersionConstraint::parse(constraint)?;
        self.dependencies.push(DependencySpec::new(name, constraint));
        Ok(self)
    }

    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_include_dirs(mut self, include_dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = include_dirs;
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

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Source paths joined onto the package root
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.sources.iter().map(|s| self.root.join(s)).collect()
    }

    /// Include directories joined onto the package root
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.include_dirs.iter().map(|d| self.root.join(d)).collect()
    }

    /// Parse manifest from TOML string, resolving paths against `root`
    pub fn from_toml_str(content: &str, root: impl Into<PathBuf>) -> crate::Result<Self> {
        let file: ManifestFile = toml::from_str(content)?;
        file.into_manifest(root.into())
    }

    /// Load manifest from a `clyde.toml` file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml_str(&content, root)
    }

    /// Serialize to TOML string
    pub fn to_toml_string(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(&ManifestFile::from(self))?)
    }
}

/// On-disk layout of `clyde.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    package: PackageSection,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    traits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageSection {
    name: String,
    version: Version,
    #[serde(default, rename = "type")]
    kind: PackageKind,
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    includes: Vec<PathBuf>,
    #[serde(default)]
    cflags: Vec<String>,
}

impl ManifestFile {
    fn into_manifest(self, root: PathBuf) -> crate::Result<Manifest> {
        // BTreeMap keys give a stable declaration order
        let dependencies = self
            .dependencies
            .into_iter()
            .map(|(name, constraint)| {
                VersionConstraint::parse(&constraint).map(|c| DependencySpec::new(name, c))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Manifest {
            name: self.package.name,
            version: self.package.version,
            kind: self.package.kind,
            dependencies,
            sources: self.package.sources,
            include_dirs: self.package.includes,
            cflags: self.package.cflags,
            traits: self.traits,
            root,
        })
    }
}

impl From<&Manifest> for ManifestFile {
    fn from(manifest: &Manifest) -> Self {
        Self {
            package: PackageSection {
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                kind: manifest.kind,
                sources: manifest.sources.clone(),
                includes: manifest.include_dirs.clone(),
                cflags: manifest.cflags.clone(),
            },
            dependencies: manifest
                .dependencies
                .iter()
                .map(|d| (d.name.clone(), d.constraint.to_string()))
                .collect(),
            traits: manifest.traits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let toml = r#"
            [package]
            name = "formatter"
            version = "1.0.0"
        "#;

        let manifest = Manifest::from_toml_str(toml, "/pkgs/formatter").unwrap();
        assert_eq!(manifest.name, "formatter");
        assert_eq!(manifest.version.to_string(), "1.0.0");
        assert_eq!(manifest.kind, PackageKind::Library);
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.root, PathBuf::from("/pkgs/formatter"));
    }

    #[test]
    fn test_parse_complete_manifest() {
        let toml = r#"
            [package]
            name = "main_app"
            version = "0.3.1"
            type = "application"
            sources = ["src/main.c", "src/args.c"]
            includes = ["include"]
            cflags = ["-Wall", "-O2"]

            [dependencies]
            formatter = "^1.0.0"
            "@acme/logging" = ">=0.2.0 <0.4.0"

            [traits]
            variant = "debug"
        "#;

        let manifest = Manifest::from_toml_str(toml, ".").unwrap();
        assert_eq!(manifest.kind, PackageKind::Executable);
        assert_eq!(manifest.sources.len(), 2);
        assert_eq!(manifest.cflags, vec!["-Wall", "-O2"]);
        assert_eq!(manifest.dependencies.len(), 2);
        assert_eq!(manifest.dependencies[0].name, "@acme/logging");
        assert_eq!(manifest.traits.get("variant").map(String::as_str), Some("debug"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            [package]
            name = "x"
            version = "1.0.0"
            colour = "blue"
        "#;
        assert!(Manifest::from_toml_str(toml, ".").is_err());
    }

    #[test]
    fn test_invalid_constraint_in_manifest() {
        let toml = r#"
            [package]
            name = "x"
            version = "1.0.0"

            [dependencies]
            y = "^not-a-version"
        "#;
        assert!(matches!(
            Manifest::from_toml_str(toml, "."),
            Err(crate::PackageError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn test_package_id_ordering() {
        let a1 = PackageId::new("a", Version::new(1, 0, 0));
        let a2 = PackageId::new("a", Version::new(2, 0, 0));
        let b1 = PackageId::new("b", Version::new(0, 1, 0));
        let mut ids = vec![b1.clone(), a2.clone(), a1.clone()];
        ids.sort();
        assert_eq!(ids, vec![a1, a2, b1]);
    }

    #[test]
    fn test_paths_resolved_against_root() {
        let manifest = Manifest::new("fmt", Version::new(1, 0, 0))
            .with_root("/work/fmt")
            .with_sources(vec![PathBuf::from("src/fmt.c")])
            .with_include_dirs(vec![PathBuf::from("include")]);

        assert_eq!(manifest.source_paths(), vec![PathBuf::from("/work/fmt/src/fmt.c")]);
        assert_eq!(manifest.include_paths(), vec![PathBuf::from("/work/fmt/include")]);
    }

    #[test]
    fn test_toml_round_trip_keeps_dependencies() {
        let manifest = Manifest::new("app", Version::new(1, 0, 0))
            .with_kind(PackageKind::Executable)
            .with_dependency("formatter", "^1.0.0")
            .unwrap();

        let text = manifest.to_toml_string().unwrap();
        let parsed = Manifest::from_toml_str(&text, "").unwrap();
        assert_eq!(parsed, manifest);
    }
}
