//! Dependency resolution
//!
//! Walks the dependency tree of a root manifest depth first, selecting one
//! version per package name. When a package is reached through several
//! paths with different constraints (a diamond), the selected version must
//! satisfy all of them.

use crate::constraint::VersionConstraint;
use crate::lockfile::Lockfile;
use crate::lookup::ManifestLookup;
use crate::manifest::{Manifest, PackageId};
use crate::validator::{ValidationError, Validator};
use log::{debug, info};
use semver::Version;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub mod conflict;
mod graph;

pub use conflict::{Conflict, Requirement};
pub use graph::{DependencyEdge, DependencyGraph};

use conflict::display_path;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Package '{package}' ({constraint}) required by {requested_by} was not found")]
    UnresolvedDependency {
        package: String,
        requested_by: PackageId,
        constraint: VersionConstraint,
    },

    #[error("Version conflict: {0}")]
    VersionConflict(Conflict),

    #[error("Circular dependency detected: {}", display_path(.cycle))]
    CyclicDependency { cycle: Vec<PackageId> },

    #[error("Invalid manifest for {package}: {}", display_errors(.errors))]
    InvalidManifest {
        package: PackageId,
        errors: Vec<ValidationError>,
    },

    #[error("Lookup failed for '{package}': {message}")]
    Lookup { package: String, message: String },

    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),
}

fn display_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// Which candidate to pick when several satisfy every requirement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Highest satisfying version
    #[default]
    Highest,
    /// First satisfying candidate in lookup order
    FirstFound,
}

/// Resolution settings
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub policy: SelectionPolicy,
    /// Versions to prefer per package name, usually from a lockfile
    pub locked: BTreeMap<String, Version>,
}

impl ResolveOptions {
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lockfile(mut self, lockfile: &Lockfile) -> Self {
        self.locked = lockfile
            .packages
            .iter()
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect();
        self
    }
}

/// Resolve `root` against `lookup` with default options
pub fn resolve(root: &Manifest, lookup: &dyn ManifestLookup) -> ResolverResult<DependencyGraph> {
    Resolver::new(lookup).resolve(root)
}

/// Dependency resolver
pub struct Resolver<'a> {
    lookup: &'a dyn ManifestLookup,
    options: ResolveOptions,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeState {
    InProgress,
    Done,
}

/// One manifest being walked
struct Frame {
    manifest: Arc<Manifest>,
    next_dep: usize,
    path: Vec<PackageId>,
}

/// Why a resolution attempt stopped
enum Outcome {
    /// A requirement was not satisfied by an earlier selection; retry with it known up front
    Learn(String, Requirement),
    /// A learned requirement was violated again; rule out the package version imposing it
    Exclude(PackageId, Conflict),
    /// A valid graph whose selections leaned on requesters that are not in it
    Retire(DependencyGraph, Vec<(String, Requirement)>),
    Fail(ResolverError),
}

impl From<ResolverError> for Outcome {
    fn from(e: ResolverError) -> Self {
        Outcome::Fail(e)
    }
}

type CandidateCache = HashMap<(String, VersionConstraint), Vec<Arc<Manifest>>>;

type LearnedKey = (String, VersionConstraint, PackageId);

/// What one pass teaches the next
///
/// A learned requirement only holds while its requester is part of the
/// solution at the same version. Requirements whose requester drops out are
/// retired once; if they are learned again they stay.
#[derive(Default)]
struct Learned {
    requirements: HashMap<String, Vec<Requirement>>,
    retired: HashSet<LearnedKey>,
    /// Package versions ruled out, with the conflict that ruled them out
    excluded: HashMap<PackageId, Conflict>,
}

fn learned_key(name: &str, req: &Requirement) -> LearnedKey {
    (name.to_string(), req.constraint.clone(), req.requested_by.clone())
}

fn same_requirement(a: &Requirement, b: &Requirement) -> bool {
    a.constraint == b.constraint && a.requested_by == b.requested_by
}

impl Learned {
    fn contains(&self, name: &str, req: &Requirement) -> bool {
        self.requirements
            .get(name)
            .is_some_and(|reqs| reqs.iter().any(|r| same_requirement(r, req)))
    }

    fn learn(&mut self, name: String, req: Requirement) {
        self.requirements.entry(name).or_default().push(req);
    }

    fn can_retire(&self, name: &str, req: &Requirement) -> bool {
        !self.retired.contains(&learned_key(name, req))
    }

    fn retire(&mut self, stale: Vec<(String, Requirement)>) {
        for (name, req) in stale {
            if let Some(reqs) = self.requirements.get_mut(&name) {
                reqs.retain(|r| !same_requirement(r, &req));
            }
            self.retired.insert(learned_key(&name, &req));
        }
    }

    /// Split learned requirements on `name` into ones whose requester is
    /// selected at the same version and ones whose requester is undecided
    fn applicable(
        &self,
        name: &str,
        selected: &HashMap<String, Arc<Manifest>>,
    ) -> (Vec<Requirement>, Vec<Requirement>) {
        let mut confirmed = Vec::new();
        let mut assumed = Vec::new();
        for req in self.requirements.get(name).into_iter().flatten() {
            match selected.get(&req.requested_by.name) {
                Some(m) if m.version == req.requested_by.version => confirmed.push(req.clone()),
                Some(_) => {}
                None if self.excluded.contains_key(&req.requested_by) => {}
                None => assumed.push(req.clone()),
            }
        }
        (confirmed, assumed)
    }
}

impl<'a> Resolver<'a> {
    pub fn new(lookup: &'a dyn ManifestLookup) -> Self {
        Self {
            lookup,
            options: ResolveOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve the full dependency graph of `root`
    pub fn resolve(&self, root: &Manifest) -> ResolverResult<DependencyGraph> {
        Validator::validate(root).map_err(|errors| ResolverError::InvalidManifest {
            package: root.id(),
            errors,
        })?;

        let root = Arc::new(root.clone());
        let mut learned = Learned::default();
        let mut cache = CandidateCache::new();
        let mut fallback: Option<DependencyGraph> = None;
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            match self.attempt(&root, &learned, &mut cache) {
                Ok(graph) => {
                    info!(
                        "resolved {} package(s) for {} in {} pass(es)",
                        graph.len(),
                        root.id(),
                        attempts
                    );
                    return Ok(graph);
                }
                Err(Outcome::Learn(name, requirement)) => {
                    debug!(
                        "restarting resolution: {} also requires {} {}",
                        requirement.requested_by, name, requirement.constraint
                    );
                    learned.learn(name, requirement);
                }
                Err(Outcome::Exclude(id, conflict)) => {
                    debug!("restarting resolution without {}: {}", id, conflict);
                    learned.excluded.insert(id, conflict);
                }
                Err(Outcome::Retire(graph, stale)) => {
                    for (name, req) in &stale {
                        debug!(
                            "restarting resolution: dropping {} {} from {}, which is not selected",
                            name, req.constraint, req.requested_by
                        );
                    }
                    learned.retire(stale);
                    fallback = Some(graph);
                }
                Err(Outcome::Fail(ResolverError::VersionConflict(conflict))) => {
                    if let Some(graph) = fallback {
                        debug!("keeping previous resolution after conflict: {}", conflict);
                        return Ok(graph);
                    }
                    return Err(ResolverError::VersionConflict(conflict));
                }
                Err(Outcome::Fail(e)) => return Err(e),
            }
        }
    }

    fn attempt(
        &self,
        root: &Arc<Manifest>,
        learned: &Learned,
        cache: &mut CandidateCache,
    ) -> Result<DependencyGraph, Outcome> {
        let mut graph = DependencyGraph::new();
        let root_id = graph.add_package(Arc::clone(root));
        graph.set_root(&root_id)?;

        // Requirements from edges walked in this pass
        let mut requirements: HashMap<String, Vec<Requirement>> = HashMap::new();
        let mut applied: Vec<(String, Requirement)> = Vec::new();
        let mut selected: HashMap<String, Arc<Manifest>> = HashMap::new();
        let mut state: HashMap<String, NodeState> = HashMap::new();
        selected.insert(root.name.clone(), Arc::clone(root));
        state.insert(root.name.clone(), NodeState::InProgress);

        let mut stack = vec![Frame {
            manifest: Arc::clone(root),
            next_dep: 0,
            path: vec![root_id.clone()],
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(dep) = frame.manifest.dependencies.get(frame.next_dep).cloned() else {
                state.insert(frame.manifest.name.clone(), NodeState::Done);
                stack.pop();
                continue;
            };
            frame.next_dep += 1;

            let from = frame.manifest.id();
            let requirement = Requirement::new(dep.constraint.clone(), from.clone(), frame.path.clone());

            if let Some(chosen) = selected.get(&dep.name).cloned() {
                if state.get(&dep.name) == Some(&NodeState::InProgress) {
                    let pos = stack
                        .iter()
                        .position(|f| f.manifest.name == dep.name)
                        .unwrap_or(0);
                    let mut cycle: Vec<PackageId> =
                        stack[pos..].iter().map(|f| f.manifest.id()).collect();
                    cycle.push(chosen.id());
                    return Err(ResolverError::CyclicDependency { cycle }.into());
                }
                if !dep.constraint.satisfies(&chosen.version) {
                    if !learned.contains(&dep.name, &requirement) {
                        return Err(Outcome::Learn(dep.name.clone(), requirement));
                    }
                    let mut reqs = requirements.remove(&dep.name).unwrap_or_default();
                    reqs.push(requirement);
                    let conflict = Conflict::new(dep.name.clone(), reqs)
                        .with_available(available_versions(&dep.name, cache));
                    if from == root_id {
                        return Err(ResolverError::VersionConflict(conflict).into());
                    }
                    return Err(Outcome::Exclude(from, conflict));
                }
                requirements.entry(dep.name.clone()).or_default().push(requirement);
                graph.add_edge(&from, &chosen.id(), dep.constraint.clone())?;
                continue;
            }

            let candidates = self.candidates(&dep.name, &dep.constraint, cache)?;
            if candidates.is_empty() {
                return Err(ResolverError::UnresolvedDependency {
                    package: dep.name.clone(),
                    requested_by: from,
                    constraint: dep.constraint.clone(),
                }
                .into());
            }

            let (confirmed, assumed) = learned.applicable(&dep.name, &selected);
            let mut firm = vec![requirement.clone()];
            firm.extend(confirmed);
            let all: Vec<Requirement> = firm.iter().chain(&assumed).cloned().collect();

            let chosen = match self.select(&dep.name, &candidates, &all, &learned.excluded) {
                Some(chosen) => {
                    applied.extend(assumed.into_iter().map(|r| (dep.name.clone(), r)));
                    chosen
                }
                None => self
                    .select(&dep.name, &candidates, &firm, &learned.excluded)
                    .ok_or_else(|| conflict_for(&dep.name, &candidates, firm, &learned.excluded))?,
            };

            Validator::validate(&chosen).map_err(|errors| ResolverError::InvalidManifest {
                package: chosen.id(),
                errors,
            })?;

            debug!("selected {} for {} (requested by {})", chosen.id(), dep.constraint, from);

            requirements.entry(dep.name.clone()).or_default().push(requirement);
            let chosen_id = graph.add_package(Arc::clone(&chosen));
            graph.add_edge(&from, &chosen_id, dep.constraint.clone())?;

            let mut path = stack.last().map(|f| f.path.clone()).unwrap_or_default();
            path.push(chosen_id);
            selected.insert(dep.name.clone(), Arc::clone(&chosen));
            state.insert(dep.name.clone(), NodeState::InProgress);
            stack.push(Frame {
                manifest: chosen,
                next_dep: 0,
                path,
            });
        }

        let stale: Vec<(String, Requirement)> = applied
            .into_iter()
            .filter(|(name, req)| !graph.contains(&req.requested_by) && learned.can_retire(name, req))
            .collect();
        if !stale.is_empty() {
            return Err(Outcome::Retire(graph, stale));
        }
        Ok(graph)
    }

    /// Candidates for one dependency, cached per (name, constraint)
    fn candidates(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        cache: &mut CandidateCache,
    ) -> ResolverResult<Vec<Arc<Manifest>>> {
        let key = (name.to_string(), constraint.clone());
        if let Some(found) = cache.get(&key) {
            return Ok(found.clone());
        }

        let found: Vec<Arc<Manifest>> = self
            .lookup
            .lookup(name, constraint)
            .map_err(|e| ResolverError::Lookup {
                package: name.to_string(),
                message: e.to_string(),
            })?
            .into_iter()
            .filter(|m| m.name == name && constraint.satisfies(&m.version))
            .map(Arc::new)
            .collect();

        cache.insert(key, found.clone());
        Ok(found)
    }

    /// Pick the candidate satisfying every requirement, honouring lock pins first
    fn select(
        &self,
        name: &str,
        candidates: &[Arc<Manifest>],
        requirements: &[Requirement],
        excluded: &HashMap<PackageId, Conflict>,
    ) -> Option<Arc<Manifest>> {
        let mut viable = candidates.iter().filter(|m| {
            !excluded.contains_key(&m.id())
                && requirements.iter().all(|r| r.constraint.satisfies(&m.version))
        });

        if let Some(pinned) = self.options.locked.get(name) {
            if let Some(m) = viable.clone().find(|m| &m.version == pinned) {
                debug!("using locked version {}@{}", name, pinned);
                return Some(Arc::clone(m));
            }
        }

        match self.options.policy {
            SelectionPolicy::Highest => viable.max_by(|a, b| a.version.cmp(&b.version)),
            SelectionPolicy::FirstFound => viable.next(),
        }
        .cloned()
    }
}

/// Conflict to report when nothing is selectable for `name`
///
/// If a candidate was only unusable because it had been ruled out, the
/// conflict that ruled it out is the real cause.
fn conflict_for(
    name: &str,
    candidates: &[Arc<Manifest>],
    requirements: Vec<Requirement>,
    excluded: &HashMap<PackageId, Conflict>,
) -> ResolverError {
    let cause = candidates
        .iter()
        .filter(|m| requirements.iter().all(|r| r.constraint.satisfies(&m.version)))
        .find_map(|m| excluded.get(&m.id()));
    if let Some(conflict) = cause {
        return ResolverError::VersionConflict(conflict.clone());
    }
    let available = candidates.iter().map(|m| m.version.clone()).collect();
    ResolverError::VersionConflict(Conflict::new(name, requirements).with_available(available))
}

/// Every version of `name` seen by any lookup so far
fn available_versions(name: &str, cache: &CandidateCache) -> Vec<Version> {
    cache
        .iter()
        .filter(|((n, _), _)| n == name)
        .flat_map(|(_, found)| found.iter().map(|m| m.version.clone()))
        .collect()
}
