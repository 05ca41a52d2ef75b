//! Storage backends for the artifact cache

use crate::artifact::Artifact;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Fingerprint-keyed artifact storage
///
/// Backends only store and fetch; write serialization and bookkeeping
/// live in [`ArtifactCache`](super::ArtifactCache).
pub trait CacheBackend: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError>;

    /// Store an artifact, returning it as stored (its location may change)
    fn put(&self, artifact: &Artifact) -> Result<Artifact, CacheError>;

    /// Remove an entry, returning whether it existed
    fn evict(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError>;

    fn entries(&self) -> Result<Vec<Artifact>, CacheError>;
}

/// Process-local backend; artifacts stay where the compiler wrote them
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<Fingerprint, Artifact>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(fingerprint).cloned())
    }

    fn put(&self, artifact: &Artifact) -> Result<Artifact, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(artifact.fingerprint.clone(), artifact.clone());
        Ok(artifact.clone())
    }

    fn evict(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.remove(fingerprint).is_some())
    }

    fn entries(&self) -> Result<Vec<Artifact>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.values().cloned().collect())
    }
}

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    artifacts: Vec<Artifact>,
}

/// Directory-backed cache that survives across processes
///
/// Layout:
///
/// ```text
/// <dir>/index.json
/// <dir>/artifacts/<name>-<fingerprint>/<file>
/// ```
///
/// The index is rewritten through a temporary file and a rename so readers
/// never observe a half-written index.
#[derive(Debug)]
pub struct FsBackend {
    dir: PathBuf,
    index: Mutex<BTreeMap<Fingerprint, Artifact>>,
}

impl FsBackend {
    /// Open (creating if needed) a cache directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        let artifacts = dir.join("artifacts");
        fs::create_dir_all(&artifacts).map_err(|e| CacheError::io(&artifacts, e))?;

        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content =
                fs::read_to_string(&index_path).map_err(|e| CacheError::io(&index_path, e))?;
            let file: IndexFile =
                serde_json::from_str(&content).map_err(|e| CacheError::Index {
                    path: index_path.clone(),
                    reason: e.to_string(),
                })?;
            if file.version != INDEX_VERSION {
                return Err(CacheError::Index {
                    path: index_path,
                    reason: format!("unsupported index version {}", file.version),
                });
            }
            file.artifacts
                .into_iter()
                .map(|a| (a.fingerprint.clone(), a))
                .collect()
        } else {
            BTreeMap::new()
        };

        debug!("Opened artifact cache at {} ({} entries)", dir.display(), index.len());
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_dir(&self, artifact: &Artifact) -> PathBuf {
        let stem = artifact
            .package
            .name
            .trim_start_matches('@')
            .replace('/', "_");
        self.dir
            .join("artifacts")
            .join(format!("{}-{}", stem, artifact.fingerprint))
    }

    fn persist(&self, index: &BTreeMap<Fingerprint, Artifact>) -> Result<(), CacheError> {
        let file = IndexFile {
            version: INDEX_VERSION,
            artifacts: index.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| CacheError::Index {
            path: self.dir.join(INDEX_FILE),
            reason: e.to_string(),
        })?;

        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        let target = self.dir.join(INDEX_FILE);
        fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| CacheError::io(&target, e))?;
        Ok(())
    }
}

impl CacheBackend for FsBackend {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let index = self.index.lock().map_err(|_| CacheError::Poisoned)?;
        match index.get(fingerprint) {
            Some(artifact) if artifact.location.is_file() => Ok(Some(artifact.clone())),
            Some(artifact) => {
                warn!(
                    "Cached artifact for {} missing at {}",
                    artifact.package,
                    artifact.location.display()
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, artifact: &Artifact) -> Result<Artifact, CacheError> {
        let entry_dir = self.entry_dir(artifact);
        fs::create_dir_all(&entry_dir).map_err(|e| CacheError::io(&entry_dir, e))?;

        let file_name = artifact
            .location
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| artifact.kind.file_name(&artifact.package.name).into());
        let dest = entry_dir.join(file_name);
        fs::copy(&artifact.location, &dest).map_err(|e| CacheError::io(&artifact.location, e))?;

        let stored = artifact.relocated(dest);
        let mut index = self.index.lock().map_err(|_| CacheError::Poisoned)?;
        index.insert(stored.fingerprint.clone(), stored.clone());
        self.persist(&index)?;
        Ok(stored)
    }

    fn evict(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let mut index = self.index.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(artifact) = index.remove(fingerprint) else {
            return Ok(false);
        };

        let entry_dir = self.entry_dir(&artifact);
        match fs::remove_dir_all(&entry_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&entry_dir, e)),
        }
        self.persist(&index)?;
        Ok(true)
    }

    fn entries(&self) -> Result<Vec<Artifact>, CacheError> {
        let index = self.index.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(index.values().cloned().collect())
    }
}
