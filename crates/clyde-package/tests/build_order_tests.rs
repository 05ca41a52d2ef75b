//! Property tests for graph ordering

use clyde_package::{DependencyGraph, Manifest, PackageId, VersionConstraint};
use proptest::prelude::*;
use semver::Version;
use std::collections::HashMap;

fn pkg(i: usize) -> PackageId {
    PackageId::new(format!("pkg{:02}", i), Version::new(1, 0, 0))
}

/// Random DAG: node `i` may only depend on nodes with a larger index
fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..16).prop_flat_map(|n| {
        let edges = proptest::collection::vec((0..n, 0..n), 0..n * 2).prop_map(move |pairs| {
            pairs
                .into_iter()
                .filter(|(a, b)| a < b)
                .collect::<Vec<_>>()
        });
        (Just(n), edges)
    })
}

fn build_graph(n: usize, edges: &[(usize, usize)]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in 0..n {
        graph.add_package(Manifest::new(pkg(i).name, Version::new(1, 0, 0)));
    }
    for (from, to) in edges {
        graph
            .add_edge(&pkg(*from), &pkg(*to), VersionConstraint::Wildcard)
            .unwrap();
    }
    graph
}

proptest! {
    #[test]
    fn dependencies_come_before_dependents((n, edges) in dag_strategy()) {
        let graph = build_graph(n, &edges);
        let order = graph.build_order().unwrap();
        prop_assert_eq!(order.len(), n);

        let position: HashMap<&PackageId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        for edge in graph.edges() {
            prop_assert!(position[&edge.to] < position[&edge.from]);
        }
    }

    #[test]
    fn build_order_is_deterministic((n, edges) in dag_strategy()) {
        let mut reversed = edges.clone();
        reversed.reverse();
        let a = build_graph(n, &edges).build_order().unwrap();
        let b = build_graph(n, &reversed).build_order().unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn groups_cover_every_package_once((n, edges) in dag_strategy()) {
        let graph = build_graph(n, &edges);
        let groups = graph.parallel_build_groups().unwrap();
        let total: usize = groups.iter().map(Vec::len).sum();
        prop_assert_eq!(total, n);
    }

    #[test]
    fn back_edge_creates_cycle((n, edges) in dag_strategy()) {
        prop_assume!(!edges.is_empty());
        let (from, to) = edges[0];
        let mut graph = build_graph(n, &edges);
        graph.add_edge(&pkg(to), &pkg(from), VersionConstraint::Wildcard).unwrap();

        let cycle = graph.find_cycle();
        prop_assert!(cycle.is_some());
        let cycle = cycle.unwrap();
        prop_assert_eq!(cycle.first(), cycle.last());
        prop_assert!(graph.build_order().is_err());
    }
}
