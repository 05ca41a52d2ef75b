//! Content-addressed artifact cache
//!
//! Entries are keyed by fingerprint. Lookups may run concurrently from any
//! thread; stores of the same fingerprint are serialized so only one write
//! happens and later stores are no-ops.

mod backend;

pub use backend::{CacheBackend, FsBackend, MemoryBackend};

use crate::artifact::Artifact;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use clyde_package::PackageId;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Cache counters since the cache was opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in [0, 1]; zero when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ArtifactCache {
    backend: Box<dyn CacheBackend>,
    by_package: RwLock<HashMap<PackageId, BTreeSet<Fingerprint>>>,
    write_locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl ArtifactCache {
    /// Wrap a backend, indexing its existing entries by package
    pub fn new(backend: impl CacheBackend + 'static) -> Result<Self, CacheError> {
        let mut by_package: HashMap<PackageId, BTreeSet<Fingerprint>> = HashMap::new();
        for artifact in backend.entries()? {
            by_package
                .entry(artifact.package)
                .or_default()
                .insert(artifact.fingerprint);
        }

        Ok(Self {
            backend: Box::new(backend),
            by_package: RwLock::new(by_package),
            write_locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        })
    }

    /// Empty process-local cache
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            by_package: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Persistent cache rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::new(FsBackend::open(dir)?)
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let found = self.backend.get(fingerprint)?;
        match &found {
            Some(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {} ({})", artifact.package, fingerprint.short());
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(found)
    }

    /// Store an artifact under its fingerprint
    ///
    /// Returns `false` without writing when the fingerprint is already present.
    pub fn store(&self, artifact: &Artifact) -> Result<bool, CacheError> {
        self.with_write_lock(&artifact.fingerprint, || {
            if self.backend.get(&artifact.fingerprint)?.is_some() {
                return Ok(false);
            }

            let stored = self.backend.put(artifact)?;
            self.by_package
                .write()
                .map_err(|_| CacheError::Poisoned)?
                .entry(stored.package.clone())
                .or_default()
                .insert(stored.fingerprint.clone());
            self.stores.fetch_add(1, Ordering::Relaxed);
            debug!("Cached {} ({})", stored.package, stored.fingerprint.short());
            Ok(true)
        })
    }

    /// Drop every entry for a package, returning how many were removed
    pub fn invalidate(&self, package: &PackageId) -> Result<usize, CacheError> {
        let fingerprints = self
            .by_package
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .remove(package)
            .unwrap_or_default();

        let mut removed = 0;
        for fingerprint in &fingerprints {
            if self.with_write_lock(fingerprint, || self.backend.evict(fingerprint))? {
                removed += 1;
            }
        }
        debug!("Invalidated {} cache entries for {}", removed, package);
        Ok(removed)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<(), CacheError> {
        for artifact in self.backend.entries()? {
            self.with_write_lock(&artifact.fingerprint, || self.backend.evict(&artifact.fingerprint))?;
        }
        self.by_package
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .clear();
        Ok(())
    }

    /// Fingerprints currently cached for a package
    pub fn fingerprints_for(&self, package: &PackageId) -> Result<Vec<Fingerprint>, CacheError> {
        let index = self.by_package.read().map_err(|_| CacheError::Poisoned)?;
        Ok(index
            .get(package)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            entries: self.backend.entries()?.len(),
        })
    }

    /// Run `f` holding the write lock for `fingerprint`
    ///
    /// The lock entry is dropped again once no other writer is waiting on it.
    fn with_write_lock<T>(
        &self,
        fingerprint: &Fingerprint,
        f: impl FnOnce() -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let lock = {
            let mut locks = self.write_locks.lock().map_err(|_| CacheError::Poisoned)?;
            Arc::clone(locks.entry(fingerprint.clone()).or_default())
        };
        let result = lock
            .lock()
            .map_err(|_| CacheError::Poisoned)
            .and_then(|_guard| f());

        let mut locks = self.write_locks.lock().map_err(|_| CacheError::Poisoned)?;
        // One reference in the map and ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(fingerprint);
        }
        result
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("stores", &self.stores.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
