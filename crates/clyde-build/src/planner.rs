//! Build planning: fingerprint every package and mark it cached or stale

use crate::artifact::Artifact;
use crate::cache::ArtifactCache;
use crate::error::{BuildError, BuildResult};
use crate::fingerprint::{compute_fingerprint, BuildFlags, Fingerprint, FingerprintInputs};
use clyde_package::{DependencyGraph, Manifest, PackageId};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a package needs compiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// A matching artifact already exists
    Cached(Artifact),
    /// Must be compiled
    Stale,
}

/// One package in a build plan
#[derive(Debug, Clone)]
pub struct BuildNode {
    pub id: PackageId,
    pub manifest: Arc<Manifest>,
    pub fingerprint: Fingerprint,
    /// Direct dependencies, sorted
    pub dependencies: Vec<PackageId>,
    pub state: NodeState,
}

impl BuildNode {
    pub fn is_cached(&self) -> bool {
        matches!(self.state, NodeState::Cached(_))
    }
}

/// Packages in dependency order, each with its fingerprint and cache state
///
/// Every node appears after all of its dependencies.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    root: PackageId,
    nodes: Vec<BuildNode>,
    flags: BuildFlags,
}

impl BuildPlan {
    pub fn root(&self) -> &PackageId {
        &self.root
    }

    pub fn nodes(&self) -> &[BuildNode] {
        &self.nodes
    }

    /// Global flags the plan was fingerprinted with
    pub fn flags(&self) -> &BuildFlags {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &PackageId) -> Option<&BuildNode> {
        self.position(id).map(|i| &self.nodes[i])
    }

    /// Index of a package in plan order
    pub fn position(&self, id: &PackageId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    pub fn cached_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_cached()).count()
    }

    pub fn stale_count(&self) -> usize {
        self.len() - self.cached_count()
    }
}

pub struct Planner;

impl Planner {
    /// Produce a build plan for a resolved graph
    ///
    /// Cache lookup failures are logged and the package is planned as stale.
    pub fn plan(
        graph: &DependencyGraph,
        inputs: &FingerprintInputs,
        cache: &ArtifactCache,
    ) -> BuildResult<BuildPlan> {
        let root = graph
            .root()
            .cloned()
            .ok_or_else(|| BuildError::invalid_graph("graph has no root package"))?;
        graph.validate().map_err(BuildError::invalid_graph)?;
        let order = graph.build_order().map_err(BuildError::invalid_graph)?;

        let flags_digest = inputs.flags.digest();
        let mut fingerprints: HashMap<PackageId, Fingerprint> = HashMap::new();
        let mut nodes = Vec::with_capacity(order.len());

        for id in order {
            let manifest = graph
                .get(&id)
                .cloned()
                .ok_or_else(|| BuildError::invalid_graph(format!("missing manifest for {}", id)))?;

            let dependencies: Vec<PackageId> =
                graph.dependencies(&id).into_iter().cloned().collect();
            let dep_fingerprints = dependencies
                .iter()
                .map(|dep| {
                    fingerprints.get(dep).map(|fp| (dep, fp)).ok_or_else(|| {
                        BuildError::invalid_graph(format!("{} planned before {}", id, dep))
                    })
                })
                .collect::<BuildResult<Vec<_>>>()?;

            let source_digest = inputs.hasher.hash_sources(&manifest)?;
            let fingerprint =
                compute_fingerprint(&manifest, &source_digest, &flags_digest, &dep_fingerprints);

            let state = match cache.lookup(&fingerprint) {
                Ok(Some(artifact)) => NodeState::Cached(artifact),
                Ok(None) => NodeState::Stale,
                Err(e) => {
                    warn!("Cache lookup failed for {}, rebuilding: {}", id, e);
                    NodeState::Stale
                }
            };
            debug!(
                "Planned {} [{}] {}",
                id,
                fingerprint.short(),
                if matches!(state, NodeState::Stale) { "stale" } else { "cached" }
            );

            fingerprints.insert(id.clone(), fingerprint.clone());
            nodes.push(BuildNode {
                id,
                manifest,
                fingerprint,
                dependencies,
                state,
            });
        }

        let plan = BuildPlan {
            root,
            nodes,
            flags: inputs.flags.clone(),
        };
        info!(
            "Build plan for {}: {} packages ({} cached, {} stale)",
            plan.root,
            plan.len(),
            plan.cached_count(),
            plan.stale_count()
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::cache::CacheBackend;
    use crate::error::CacheError;
    use crate::fingerprint::{CompilerInfo, FingerprintHasher, SourceHasher};
    use clyde_package::{resolve, InMemoryLookup, PackageKind};
    use pretty_assertions::assert_eq;
    use semver::Version;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Hashes a per-package string instead of files
    #[derive(Default)]
    struct FakeSources(Mutex<BTreeMap<String, String>>);

    impl FakeSources {
        fn set(&self, name: &str, content: &str) {
            self.0.lock().unwrap().insert(name.into(), content.into());
        }
    }

    impl SourceHasher for FakeSources {
        fn hash_sources(&self, manifest: &Manifest) -> BuildResult<Fingerprint> {
            let content = self.0.lock().unwrap().get(&manifest.name).cloned().unwrap_or_default();
            let mut hasher = FingerprintHasher::new();
            hasher.field("content", content);
            Ok(hasher.finish())
        }
    }

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get(&self, _: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
            Err(CacheError::Poisoned)
        }
        fn put(&self, artifact: &Artifact) -> Result<Artifact, CacheError> {
            Ok(artifact.clone())
        }
        fn evict(&self, _: &Fingerprint) -> Result<bool, CacheError> {
            Ok(false)
        }
        fn entries(&self) -> Result<Vec<Artifact>, CacheError> {
            Ok(Vec::new())
        }
    }

    fn chain_graph() -> DependencyGraph {
        let lookup = InMemoryLookup::new()
            .with(Manifest::new("zlib", Version::new(1, 3, 0)))
            .with(
                Manifest::new("png", Version::new(1, 6, 0))
                    .with_dependency("zlib", "^1.0")
                    .unwrap(),
            );
        let app = Manifest::new("viewer", Version::new(0, 1, 0))
            .with_kind(PackageKind::Executable)
            .with_sources(vec!["main.c".into()])
            .with_dependency("png", "^1.6")
            .unwrap();
        resolve(&app, &lookup).unwrap()
    }

    fn inputs(sources: Arc<FakeSources>) -> FingerprintInputs {
        FingerprintInputs::new(BuildFlags::new().with_compiler(CompilerInfo::new("gcc", "13", "x86_64")))
            .with_hasher(sources)
    }

    fn names(plan: &BuildPlan) -> Vec<&str> {
        plan.nodes().iter().map(|n| n.id.name.as_str()).collect()
    }

    #[test]
    fn test_plan_order_and_staleness() {
        let plan = Planner::plan(
            &chain_graph(),
            &inputs(Arc::default()),
            &ArtifactCache::in_memory(),
        )
        .unwrap();

        assert_eq!(names(&plan), vec!["zlib", "png", "viewer"]);
        assert_eq!(plan.stale_count(), 3);
        assert_eq!(plan.root().name, "viewer");
        assert_eq!(plan.position(plan.root()), Some(2));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let graph = chain_graph();
        let sources = Arc::new(FakeSources::default());
        let cache = ArtifactCache::in_memory();
        let a = Planner::plan(&graph, &inputs(sources.clone()), &cache).unwrap();
        let b = Planner::plan(&graph, &inputs(sources), &cache).unwrap();

        let fps = |p: &BuildPlan| p.nodes().iter().map(|n| n.fingerprint.clone()).collect::<Vec<_>>();
        assert_eq!(fps(&a), fps(&b));
    }

    #[test]
    fn test_deep_change_invalidates_ancestors_only() {
        let graph = chain_graph();
        let sources = Arc::new(FakeSources::default());
        let cache = ArtifactCache::in_memory();

        let before = Planner::plan(&graph, &inputs(sources.clone()), &cache).unwrap();
        sources.set("png", "changed");
        let after = Planner::plan(&graph, &inputs(sources), &cache).unwrap();

        let changed: Vec<bool> = before
            .nodes()
            .iter()
            .zip(after.nodes())
            .map(|(b, a)| b.fingerprint != a.fingerprint)
            .collect();
        assert_eq!(changed, vec![false, true, true]);
    }

    #[test]
    fn test_flags_change_every_fingerprint() {
        let graph = chain_graph();
        let cache = ArtifactCache::in_memory();
        let base = inputs(Arc::default());
        let mut optimized = base.clone();
        optimized.flags.cflags.push("-O2".into());

        let a = Planner::plan(&graph, &base, &cache).unwrap();
        let b = Planner::plan(&graph, &optimized, &cache).unwrap();
        assert!(a
            .nodes()
            .iter()
            .zip(b.nodes())
            .all(|(x, y)| x.fingerprint != y.fingerprint));
    }

    #[test]
    fn test_cached_nodes_detected() {
        let graph = chain_graph();
        let cache = ArtifactCache::in_memory();
        let first = Planner::plan(&graph, &inputs(Arc::default()), &cache).unwrap();

        let zlib = &first.nodes()[0];
        let artifact = Artifact::new(
            zlib.id.clone(),
            zlib.fingerprint.clone(),
            "/out/libzlib.a",
            ArtifactKind::StaticLibrary,
        );
        cache.store(&artifact).unwrap();

        let second = Planner::plan(&graph, &inputs(Arc::default()), &cache).unwrap();
        assert_eq!(second.nodes()[0].state, NodeState::Cached(artifact));
        assert_eq!(second.cached_count(), 1);
    }

    #[test]
    fn test_cache_failure_plans_stale() {
        let cache = ArtifactCache::new(BrokenBackend).unwrap();
        let plan = Planner::plan(&chain_graph(), &inputs(Arc::default()), &cache).unwrap();
        assert_eq!(plan.stale_count(), 3);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let result = Planner::plan(
            &DependencyGraph::new(),
            &FingerprintInputs::default(),
            &ArtifactCache::in_memory(),
        );
        assert!(matches!(result, Err(BuildError::InvalidGraph(_))));
    }

    #[test]
    fn test_unreadable_source_aborts_plan() {
        let mut graph = DependencyGraph::new();
        let id = graph.add_package(
            Manifest::new("ghost", Version::new(1, 0, 0))
                .with_root("/nonexistent/clyde/ghost")
                .with_sources(vec!["ghost.c".into()]),
        );
        graph.set_root(&id).unwrap();

        let result = Planner::plan(&graph, &FingerprintInputs::default(), &ArtifactCache::in_memory());
        assert!(matches!(result, Err(BuildError::Io { .. })));
    }
}
