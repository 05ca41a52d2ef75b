//! Package manifest validation

use crate::manifest::{Manifest, PackageKind};
use std::collections::HashSet;
use std::path::{Component, Path};

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid package name format
    InvalidPackageName(String),
    /// Invalid dependency specification
    InvalidDependency { name: String, reason: String },
    /// Executable declares nothing to compile
    MissingSources(String),
    /// Source or include path is absolute or leaves the package root
    InvalidPath { path: String, reason: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidPackageName(name) => {
                write!(f, "Invalid package name: {}", name)
            }
            ValidationError::InvalidDependency { name, reason } => {
                write!(f, "Invalid dependency '{}': {}", name, reason)
            }
            ValidationError::MissingSources(name) => {
                write!(f, "Executable '{}' has no source files", name)
            }
            ValidationError::InvalidPath { path, reason } => {
                write!(f, "Invalid path '{}': {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Package manifest validator
pub struct Validator;

impl Validator {
    /// Validate package manifest
    pub fn validate(manifest: &Manifest) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_package_name(&manifest.name) {
            errors.push(e);
        }

        errors.extend(Self::validate_dependencies(manifest));

        if manifest.kind == PackageKind::Executable && manifest.sources.is_empty() {
            errors.push(ValidationError::MissingSources(manifest.name.clone()));
        }

        for path in manifest.sources.iter().chain(&manifest.include_dirs) {
            if let Err(e) = Self::validate_relative_path(path) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate package name format
    ///
    /// Names are `name` or `@org/name`, each part made of ASCII letters,
    /// digits, `-` and `_`.
    pub fn validate_package_name(name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::InvalidPackageName(
                "Package name cannot be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = match name.strip_prefix('@') {
            Some(scoped) => match scoped.split_once('/') {
                Some((org, pkg)) => vec![org, pkg],
                None => {
                    return Err(ValidationError::InvalidPackageName(format!(
                        "'{}' is scoped but has no '/'",
                        name
                    )))
                }
            },
            None => vec![name],
        };

        for part in parts {
            if part.is_empty() {
                return Err(ValidationError::InvalidPackageName(format!(
                    "'{}' has an empty segment",
                    name
                )));
            }
            if !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ValidationError::InvalidPackageName(format!(
                    "'{}' contains invalid characters (only letters, digits, -, _ allowed)",
                    name
                )));
            }
        }

        if name.len() > 64 {
            return Err(ValidationError::InvalidPackageName(format!(
                "'{}' exceeds maximum length of 64 characters",
                name
            )));
        }

        Ok(())
    }

    fn validate_dependencies(manifest: &Manifest) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for dep in &manifest.dependencies {
            if let Err(e) = Self::validate_package_name(&dep.name) {
                errors.push(ValidationError::InvalidDependency {
                    name: dep.name.clone(),
                    reason: e.to_string(),
                });
            }
            if dep.name == manifest.name {
                errors.push(ValidationError::InvalidDependency {
                    name: dep.name.clone(),
                    reason: "Package cannot depend on itself".to_string(),
                });
            }
            if !seen.insert(dep.name.as_str()) {
                errors.push(ValidationError::InvalidDependency {
                    name: dep.name.clone(),
                    reason: "Declared more than once".to_string(),
                });
            }
        }

        errors
    }

    fn validate_relative_path(path: &Path) -> Result<(), ValidationError> {
        if path.is_absolute() {
            return Err(ValidationError::InvalidPath {
                path: path.display().to_string(),
                reason: "must be relative to the package root".to_string(),
            });
        }

        let mut depth: i32 = 0;
        for component in path.components() {
            match component {
                Component::ParentDir => depth -= 1,
                Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(ValidationError::InvalidPath {
                    path: path.display().to_string(),
                    reason: "escapes the package root".to_string(),
                });
            }
        }

        Ok(())
    }
}
