//! Manifest lookup: where the resolver finds candidate packages

use crate::constraint::VersionConstraint;
use crate::manifest::{Manifest, MANIFEST_FILE};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Supplies candidate manifests for a dependency
///
/// Implementations return every manifest named `name` whose version satisfies
/// `constraint`, in their own preference order.
pub trait ManifestLookup {
    fn lookup(&self, name: &str, constraint: &VersionConstraint) -> crate::Result<Vec<Manifest>>;
}

impl<T: ManifestLookup + ?Sized> ManifestLookup for &T {
    fn lookup(&self, name: &str, constraint: &VersionConstraint) -> crate::Result<Vec<Manifest>> {
        (**self).lookup(name, constraint)
    }
}

/// Lookup backed by manifests registered in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLookup {
    packages: HashMap<String, Vec<Manifest>>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest; later registrations of the same id replace earlier ones
    pub fn add(&mut self, manifest: Manifest) {
        let entries = self.packages.entry(manifest.name.clone()).or_default();
        match entries.iter_mut().find(|m| m.version == manifest.version) {
            Some(existing) => *existing = manifest,
            None => entries.push(manifest),
        }
    }

    pub fn with(mut self, manifest: Manifest) -> Self {
        self.add(manifest);
        self
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ManifestLookup for InMemoryLookup {
    fn lookup(&self, name: &str, constraint: &VersionConstraint) -> crate::Result<Vec<Manifest>> {
        Ok(self
            .packages
            .get(name)
            .map(|all| {
                all.iter()
                    .filter(|m| constraint.satisfies(&m.version))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Lookup over package directories on disk
///
/// For a name `fmt` each search root is probed for `<root>/fmt/clyde.toml`
/// and `<root>/fmt/<version>/clyde.toml`. Scoped names `@org/pkg` map to
/// `<root>/org/pkg`.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLookup {
    roots: Vec<PathBuf>,
}

impl WorkspaceLookup {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    fn package_dir(root: &Path, name: &str) -> PathBuf {
        match name.strip_prefix('@').and_then(|n| n.split_once('/')) {
            Some((org, pkg)) => root.join(org).join(pkg),
            None => root.join(name),
        }
    }

    fn load_dir(dir: &Path, name: &str, found: &mut Vec<Manifest>) -> crate::Result<()> {
        let direct = dir.join(MANIFEST_FILE);
        if direct.is_file() {
            let manifest = Manifest::from_file(&direct)?;
            Self::check_name(&manifest, name, &direct)?;
            found.push(manifest);
        }

        if !dir.is_dir() {
            return Ok(());
        }

        let mut versioned: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join(MANIFEST_FILE))
            .filter(|path| path.is_file())
            .collect();
        versioned.sort();

        for path in versioned {
            let manifest = Manifest::from_file(&path)?;
            Self::check_name(&manifest, name, &path)?;
            found.push(manifest);
        }
        Ok(())
    }

    fn check_name(manifest: &Manifest, name: &str, path: &Path) -> crate::Result<()> {
        if manifest.name != name {
            return Err(crate::PackageError::InvalidManifest {
                path: path.display().to_string(),
                reason: format!("declares package '{}', expected '{}'", manifest.name, name),
            });
        }
        Ok(())
    }
}

impl ManifestLookup for WorkspaceLookup {
    fn lookup(&self, name: &str, constraint: &VersionConstraint) -> crate::Result<Vec<Manifest>> {
        let mut found = Vec::new();
        for root in &self.roots {
            let dir = Self::package_dir(root, name);
            Self::load_dir(&dir, name, &mut found)?;
        }

        // The first root wins when two roots carry the same version
        let mut seen = std::collections::HashSet::new();
        found.retain(|m| seen.insert(m.version.clone()));
        found.retain(|m| constraint.satisfies(&m.version));

        debug!("lookup {} {} -> {} candidate(s)", name, constraint, found.len());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            format!("[package]\nname = \"{}\"\nversion = \"{}\"\n", name, version),
        )
        .unwrap();
    }

    #[test]
    fn test_in_memory_filters_by_constraint() {
        let lookup = InMemoryLookup::new()
            .with(Manifest::new("d", Version::new(1, 0, 0)))
            .with(Manifest::new("d", Version::new(1, 4, 0)))
            .with(Manifest::new("d", Version::new(2, 0, 0)));

        let caret = VersionConstraint::parse("^1.0.0").unwrap();
        let found = lookup.lookup("d", &caret).unwrap();
        let versions: Vec<String> = found.iter().map(|m| m.version.to_string()).collect();
        assert_eq!(versions, vec!["1.0.0", "1.4.0"]);

        assert!(lookup.lookup("missing", &caret).unwrap().is_empty());
        assert_eq!(lookup.len(), 3);
    }

    #[test]
    fn test_in_memory_replaces_same_version() {
        let mut lookup = InMemoryLookup::new();
        lookup.add(Manifest::new("d", Version::new(1, 0, 0)));
        lookup.add(Manifest::new("d", Version::new(1, 0, 0)).with_cflags(vec!["-O2".into()]));

        let found = lookup.lookup("d", &VersionConstraint::Wildcard).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cflags, vec!["-O2"]);
    }

    #[test]
    fn test_workspace_layouts() {
        let temp = TempDir::new().unwrap();
        write_manifest(&temp.path().join("formatter"), "formatter", "1.0.0");
        write_manifest(&temp.path().join("formatter").join("0.9.0"), "formatter", "0.9.0");
        write_manifest(&temp.path().join("acme").join("logging"), "@acme/logging", "0.2.0");

        let lookup = WorkspaceLookup::new([temp.path()]);

        let all = lookup.lookup("formatter", &VersionConstraint::Wildcard).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].root, temp.path().join("formatter"));

        let scoped = lookup.lookup("@acme/logging", &VersionConstraint::Wildcard).unwrap();
        assert_eq!(scoped[0].version, Version::new(0, 2, 0));

        assert!(lookup.lookup("nothing", &VersionConstraint::Wildcard).unwrap().is_empty());
    }

    #[test]
    fn test_workspace_name_mismatch() {
        let temp = TempDir::new().unwrap();
        write_manifest(&temp.path().join("formatter"), "other", "1.0.0");

        let lookup = WorkspaceLookup::new([temp.path()]);
        let result = lookup.lookup("formatter", &VersionConstraint::Wildcard);
        assert!(matches!(result, Err(crate::PackageError::InvalidManifest { .. })));
    }
}
