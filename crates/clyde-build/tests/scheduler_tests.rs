//! Scheduler behaviour over in-memory plans
//!
//! Packages here have no sources, so fingerprints depend only on the graph
//! and compiles never touch the filesystem.

use clyde_build::*;
use clyde_package::VersionConstraint;
use pretty_assertions::assert_eq;
use rstest::rstest;
use semver::Version;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn id(name: &str) -> PackageId {
    PackageId::new(name, Version::new(1, 0, 0))
}

/// Graph of 1.0.0 libraries; edges are `(dependent, dependency)`
fn graph(root: &str, packages: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for name in packages {
        graph.add_package(Manifest::new(*name, Version::new(1, 0, 0)));
    }
    for (from, to) in edges {
        graph
            .add_edge(&id(from), &id(to), VersionConstraint::parse("^1.0").unwrap())
            .unwrap();
    }
    graph.set_root(&id(root)).unwrap();
    graph
}

fn plan(graph: &DependencyGraph, cache: &ArtifactCache) -> BuildPlan {
    Planner::plan(graph, &FingerprintInputs::default(), cache).unwrap()
}

fn scheduler(jobs: usize, policy: FailurePolicy, cache: &Arc<ArtifactCache>) -> Scheduler {
    Scheduler::new(
        SchedulerConfig {
            concurrency_limit: jobs,
            failure_policy: policy,
        },
        Arc::clone(cache),
    )
}

fn virtual_artifact(request: &CompileRequest) -> Artifact {
    request.artifact(format!("/virtual/{}", request.output_file_name()))
}

fn statuses(report: &BuildReport) -> BTreeMap<String, String> {
    report
        .nodes
        .iter()
        .map(|n| (n.package.name.clone(), n.status.to_string()))
        .collect()
}

/// `app` depends on `bad` and `good`
fn fan_in() -> DependencyGraph {
    graph("app", &["app", "bad", "good"], &[("app", "bad"), ("app", "good")])
}

#[test]
fn test_all_stale_packages_built_in_dependency_order() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let graph = graph(
        "app",
        &["app", "net", "tls", "zlib"],
        &[("app", "net"), ("net", "tls"), ("tls", "zlib"), ("app", "zlib")],
    );
    let plan = plan(&graph, &cache);

    let seen: Arc<Mutex<Vec<(String, Vec<String>)>>> = Arc::default();
    let recorder = Arc::clone(&seen);
    let report = scheduler(4, FailurePolicy::FailFast, &cache)
        .execute(&plan, move |request: &CompileRequest| {
            let deps = request
                .dependency_artifacts
                .iter()
                .map(|a| a.package.name.clone())
                .collect();
            recorder.lock().unwrap().push((request.package.name.clone(), deps));
            Ok(virtual_artifact(request))
        })
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.summary().built, 4);

    let seen = seen.lock().unwrap().clone();
    let order: Vec<&str> = seen.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(order, vec!["zlib", "tls", "net", "app"]);
    // Every transitive dependency is linked, in plan order
    assert_eq!(seen[3].1, vec!["zlib", "tls", "net"]);
    assert_eq!(cache.stats().unwrap().stores, 4);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_concurrency_limit_respected(#[case] jobs: usize) {
    init_logging();
    let leaves: Vec<String> = (0..10).map(|i| format!("leaf{i}")).collect();
    let mut names: Vec<&str> = leaves.iter().map(String::as_str).collect();
    names.push("app");
    let edges: Vec<(&str, &str)> = leaves.iter().map(|l| ("app", l.as_str())).collect();

    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&graph("app", &names, &edges), &cache);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    let report = scheduler(jobs, FailurePolicy::FailFast, &cache)
        .execute(&plan, move |request: &CompileRequest| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(virtual_artifact(request))
        })
        .unwrap();

    assert!(report.is_success());
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= jobs, "peak {peak} exceeds limit {jobs}");
}

#[test]
fn test_fail_fast_cancels_unstarted_work() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let report = scheduler(1, FailurePolicy::FailFast, &cache)
        .execute(&plan, move |request: &CompileRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            if request.package.name == "bad" {
                Err(request.fail("bad.c:1: error: expected ';'"))
            } else {
                Ok(virtual_artifact(request))
            }
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        statuses(&report),
        BTreeMap::from([
            ("app".to_string(), "blocked by bad@1.0.0".to_string()),
            ("bad".to_string(), "failed: bad.c:1: error: expected ';'".to_string()),
            ("good".to_string(), "cancelled".to_string()),
        ])
    );
    assert_eq!(cache.stats().unwrap().stores, 0);
}

#[test]
fn test_continue_on_error_builds_independent_work() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);

    let report = scheduler(1, FailurePolicy::ContinueOnError, &cache)
        .execute(&plan, |request: &CompileRequest| {
            if request.package.name == "bad" {
                Err(request.fail("link failed"))
            } else {
                Ok(virtual_artifact(request))
            }
        })
        .unwrap();

    assert_eq!(report.status_of("good"), Some(&NodeStatus::Built));
    assert_eq!(report.status_of("app"), Some(&NodeStatus::Blocked { by: id("bad") }));
    assert_eq!(report.failures().count(), 1);
    assert!(report.artifact_of("good").is_some());
    assert!(!report.is_success());
}

#[test]
fn test_failure_blocks_transitive_dependents() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let graph = graph(
        "top",
        &["top", "left", "right", "base", "other"],
        &[
            ("top", "left"),
            ("top", "right"),
            ("left", "base"),
            ("right", "base"),
            ("top", "other"),
        ],
    );
    let plan = plan(&graph, &cache);

    let report = scheduler(2, FailurePolicy::ContinueOnError, &cache)
        .execute(&plan, |request: &CompileRequest| {
            if request.package.name == "base" {
                Err(request.fail("missing header"))
            } else {
                Ok(virtual_artifact(request))
            }
        })
        .unwrap();

    let summary = report.summary();
    assert_eq!((summary.failed, summary.blocked, summary.built), (1, 3, 1));
    for name in ["left", "right", "top"] {
        assert_eq!(report.status_of(name), Some(&NodeStatus::Blocked { by: id("base") }));
    }
}

#[test]
fn test_panicking_compiler_is_a_failure() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);

    let report = scheduler(2, FailurePolicy::ContinueOnError, &cache)
        .execute(&plan, |request: &CompileRequest| {
            if request.package.name == "bad" {
                panic!("toolchain crashed");
            }
            Ok(virtual_artifact(request))
        })
        .unwrap();

    match report.status_of("bad") {
        Some(NodeStatus::Failed { error }) => {
            assert_eq!(error.message, "compiler panicked: toolchain crashed")
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.status_of("good"), Some(&NodeStatus::Built));
}

#[test]
fn test_cancellation_discards_in_flight_results() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);
    let scheduler = scheduler(1, FailurePolicy::ContinueOnError, &cache);
    let cancel = scheduler.cancel_handle();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let report = scheduler
        .execute(&plan, move |request: &CompileRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            Ok(virtual_artifact(request))
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.summary().cancelled, 3);
    assert!(report.nodes.iter().all(|n| n.artifact.is_none()));
    assert_eq!(cache.stats().unwrap().stores, 0);
}

#[test]
fn test_cached_packages_are_not_recompiled() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let graph = fan_in();
    scheduler(2, FailurePolicy::FailFast, &cache)
        .execute(&plan(&graph, &cache), |request: &CompileRequest| {
            Ok(virtual_artifact(request))
        })
        .unwrap();

    let second = plan(&graph, &cache);
    assert_eq!(second.cached_count(), 3);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let report = scheduler(2, FailurePolicy::FailFast, &cache)
        .execute(&second, move |request: &CompileRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(virtual_artifact(request))
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.summary().cached, 3);
    assert_eq!(
        report.artifact_of("app").map(|a| a.location.clone()),
        Some("/virtual/libapp.a".into())
    );
}

#[test]
fn test_artifacts_cached_under_planned_fingerprint() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let graph = graph("solo", &["solo"], &[]);
    let first = plan(&graph, &cache);

    let report = scheduler(1, FailurePolicy::FailFast, &cache)
        .execute(&first, |_: &CompileRequest| {
            Ok(Artifact::new(
                id("elsewhere"),
                FingerprintHasher::new().finish(),
                "/virtual/libsolo.a",
                ArtifactKind::StaticLibrary,
            ))
        })
        .unwrap();

    let artifact = report.artifact_of("solo").unwrap();
    assert_eq!(artifact.package, id("solo"));
    assert_eq!(&artifact.fingerprint, &first.nodes()[0].fingerprint);
    assert_eq!(plan(&graph, &cache).cached_count(), 1);
    assert!(cache.fingerprints_for(&id("elsewhere")).unwrap().is_empty());
}

#[test]
fn test_observer_sees_every_transition() {
    init_logging();
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);
    let events: Arc<Mutex<Vec<BuildEvent>>> = Arc::default();
    let sink = Arc::clone(&events);

    let report = scheduler(2, FailurePolicy::ContinueOnError, &cache)
        .with_observer(Arc::new(move |event: &BuildEvent| {
            sink.lock().unwrap().push(event.clone())
        }))
        .execute(&plan, |request: &CompileRequest| {
            if request.package.name == "bad" {
                Err(request.fail("nope"))
            } else {
                Ok(virtual_artifact(request))
            }
        })
        .unwrap();

    let events = events.lock().unwrap();
    let started = events
        .iter()
        .filter(|e| matches!(e, BuildEvent::Started { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, BuildEvent::Finished { .. }))
        .count();
    assert_eq!(started, 2);
    assert_eq!(finished, report.nodes.len());
}

#[test]
fn test_zero_concurrency_rejected() {
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);
    let result = scheduler(0, FailurePolicy::FailFast, &cache)
        .execute(&plan, |request: &CompileRequest| Ok(virtual_artifact(request)));
    assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
}

#[test]
fn test_report_json_lists_packages_in_plan_order() {
    let cache = Arc::new(ArtifactCache::in_memory());
    let plan = plan(&fan_in(), &cache);
    let report = scheduler(2, FailurePolicy::FailFast, &cache)
        .execute(&plan, |request: &CompileRequest| Ok(virtual_artifact(request)))
        .unwrap();

    let json = report.to_json();
    let names: Vec<&str> = json["packages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["package"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bad", "good", "app"]);
    assert_eq!(json["summary"]["built"], 3);
}
