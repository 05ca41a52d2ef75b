//! Resolved dependency graph and build ordering

use super::{ResolverError, ResolverResult};
use crate::constraint::VersionConstraint;
use crate::manifest::{Manifest, PackageId};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Edge from a package to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: PackageId,
    pub to: PackageId,
    pub constraint: VersionConstraint,
}

/// Graph of resolved packages
///
/// Nodes are keyed by [`PackageId`]; an edge `from -> to` means `from`
/// depends on `to`. Once returned by the resolver the graph is acyclic,
/// holds one version per package name and is reachable from its root.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    root: Option<PackageId>,
    nodes: BTreeMap<PackageId, Arc<Manifest>>,
    edges: Vec<DependencyEdge>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package node, replacing any manifest already stored for its id
    pub fn add_package(&mut self, manifest: impl Into<Arc<Manifest>>) -> PackageId {
        let manifest = manifest.into();
        let id = manifest.id();
        self.nodes.insert(id.clone(), manifest);
        id
    }

    /// Add a dependency edge; both endpoints must already be nodes
    pub fn add_edge(
        &mut self,
        from: &PackageId,
        to: &PackageId,
        constraint: VersionConstraint,
    ) -> ResolverResult<()> {
        for endpoint in [from, to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(ResolverError::InvalidGraph(format!(
                    "edge {} -> {} references unknown package {}",
                    from, to, endpoint
                )));
            }
        }
        let exists = self.edges.iter().any(|e| &e.from == from && &e.to == to);
        if !exists {
            self.edges.push(DependencyEdge {
                from: from.clone(),
                to: to.clone(),
                constraint,
            });
        }
        Ok(())
    }

    pub fn set_root(&mut self, id: &PackageId) -> ResolverResult<()> {
        if !self.nodes.contains_key(id) {
            return Err(ResolverError::InvalidGraph(format!(
                "root {} is not a package in the graph",
                id
            )));
        }
        self.root = Some(id.clone());
        Ok(())
    }

    pub fn root(&self) -> Option<&PackageId> {
        self.root.as_ref()
    }

    pub fn get(&self, id: &PackageId) -> Option<&Arc<Manifest>> {
        self.nodes.get(id)
    }

    /// Find the node for a package name
    pub fn find(&self, name: &str) -> Option<&PackageId> {
        self.nodes.keys().find(|id| id.name == name)
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Package ids in `PackageId` order
    pub fn packages(&self) -> impl Iterator<Item = &PackageId> {
        self.nodes.keys()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `id`, sorted
    pub fn dependencies(&self, id: &PackageId) -> Vec<&PackageId> {
        let mut deps: Vec<&PackageId> = self
            .edges
            .iter()
            .filter(|e| &e.from == id)
            .map(|e| &e.to)
            .collect();
        deps.sort();
        deps
    }

    /// Packages that depend directly on `id`, sorted
    pub fn dependents(&self, id: &PackageId) -> Vec<&PackageId> {
        let mut users: Vec<&PackageId> = self
            .edges
            .iter()
            .filter(|e| &e.to == id)
            .map(|e| &e.from)
            .collect();
        users.sort();
        users
    }

    /// Every package reachable from `id` through dependency edges
    pub fn transitive_dependencies(&self, id: &PackageId) -> BTreeSet<PackageId> {
        let adjacency = self.adjacency();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for dep in adjacency.get(current).into_iter().flatten() {
                if seen.insert((*dep).clone()) {
                    stack.push(*dep);
                }
            }
        }
        seen
    }

    fn adjacency(&self) -> HashMap<&PackageId, Vec<&PackageId>> {
        let mut adjacency: HashMap<&PackageId, Vec<&PackageId>> = HashMap::new();
        for edge in &self.edges {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
        }
        for deps in adjacency.values_mut() {
            deps.sort();
        }
        adjacency
    }

    /// Find a dependency cycle, if any
    ///
    /// The returned path starts and ends with the same package.
    pub fn find_cycle(&self) -> Option<Vec<PackageId>> {
        let adjacency = self.adjacency();
        let mut marks: HashMap<&PackageId, Mark> = HashMap::new();

        for start in self.nodes.keys() {
            if marks.contains_key(start) {
                continue;
            }

            // (node, index of next dependency to visit)
            let mut stack: Vec<(&PackageId, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::InProgress);

            while let Some((node, next)) = stack.last_mut() {
                let deps = adjacency.get(*node).map(Vec::as_slice).unwrap_or(&[]);
                if *next >= deps.len() {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                    continue;
                }
                let dep = deps[*next];
                *next += 1;

                match marks.get(dep).copied() {
                    Some(Mark::InProgress) => {
                        let pos = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<PackageId> =
                            stack[pos..].iter().map(|(n, _)| (*n).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, 0));
                    }
                }
            }
        }

        None
    }

    /// Check the structural invariants of a resolved graph
    pub fn validate(&self) -> ResolverResult<()> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| ResolverError::InvalidGraph("graph has no root".to_string()))?;

        if let Some(cycle) = self.find_cycle() {
            return Err(ResolverError::CyclicDependency { cycle });
        }

        let mut names = HashSet::new();
        for id in self.nodes.keys() {
            if !names.insert(id.name.as_str()) {
                return Err(ResolverError::InvalidGraph(format!(
                    "package '{}' appears with more than one version",
                    id.name
                )));
            }
        }

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
                return Err(ResolverError::InvalidGraph(format!(
                    "dangling edge {} -> {}",
                    edge.from, edge.to
                )));
            }
        }

        let reachable = self.transitive_dependencies(root);
        if let Some(orphan) = self
            .nodes
            .keys()
            .find(|id| *id != root && !reachable.contains(*id))
        {
            return Err(ResolverError::InvalidGraph(format!(
                "{} is not reachable from root {}",
                orphan, root
            )));
        }

        Ok(())
    }

    /// Number of dependencies per node, for Kahn's algorithm
    fn pending_counts(&self) -> HashMap<&PackageId, usize> {
        let mut pending: HashMap<&PackageId, usize> =
            self.nodes.keys().map(|id| (id, 0)).collect();
        for edge in &self.edges {
            if let Some(count) = pending.get_mut(&edge.from) {
                *count += 1;
            }
        }
        pending
    }

    fn cycle_error(&self) -> ResolverError {
        match self.find_cycle() {
            Some(cycle) => ResolverError::CyclicDependency { cycle },
            None => ResolverError::InvalidGraph("graph could not be ordered".to_string()),
        }
    }

    /// Topological build order, dependencies first
    ///
    /// Packages with no ordering constraint between them come out in
    /// `PackageId` order, so the result is identical across runs.
    pub fn build_order(&self) -> ResolverResult<Vec<PackageId>> {
        let mut pending = self.pending_counts();
        let mut ready: BTreeSet<&PackageId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut dependents: HashMap<&PackageId, Vec<&PackageId>> = HashMap::new();
        for edge in &self.edges {
            dependents.entry(&edge.to).or_default().push(&edge.from);
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.clone());
            for user in dependents.get(next).into_iter().flatten() {
                if let Some(count) = pending.get_mut(user) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*user);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(self.cycle_error());
        }
        Ok(order)
    }

    /// Group packages into levels that can be built in parallel
    pub fn parallel_build_groups(&self) -> ResolverResult<Vec<Vec<PackageId>>> {
        let adjacency = self.adjacency();
        let mut built: HashSet<&PackageId> = HashSet::new();
        let mut groups = Vec::new();

        while built.len() < self.nodes.len() {
            // BTreeMap keys keep each group sorted
            let group: Vec<&PackageId> = self
                .nodes
                .keys()
                .filter(|id| !built.contains(id))
                .filter(|id| {
                    adjacency
                        .get(id)
                        .map_or(true, |deps| deps.iter().all(|d| built.contains(d)))
                })
                .collect();

            if group.is_empty() {
                return Err(self.cycle_error());
            }
            built.extend(group.iter().copied());
            groups.push(group.into_iter().cloned().collect());
        }

        Ok(groups)
    }

    /// Export the graph as JSON for tooling
    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<_> = self
            .nodes
            .values()
            .map(|m| {
                json!({
                    "name": m.name,
                    "version": m.version.to_string(),
                    "kind": m.kind.to_string(),
                })
            })
            .collect();
        let edges: Vec<_> = self
            .edges
            .iter()
            .map(|e| {
                json!({
                    "from": e.from.to_string(),
                    "to": e.to.to_string(),
                    "constraint": e.constraint.to_string(),
                })
            })
            .collect();

        json!({
            "root": self.root.as_ref().map(ToString::to_string),
            "nodes": nodes,
            "edges": edges,
        })
    }
}
