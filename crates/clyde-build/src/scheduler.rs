//! Parallel execution of a build plan
//!
//! The calling thread dispatches work: it tracks how many dependencies of
//! each package are still unfinished and hands ready packages to a worker
//! pool of `concurrency_limit` threads. Workers compile, store successful
//! artifacts in the cache and report back over a channel. Cached packages
//! complete on the dispatcher without occupying a worker.

use crate::artifact::Artifact;
use crate::cache::ArtifactCache;
use crate::compiler::{CompileRequest, Compiler};
use crate::error::{BuildError, BuildResult, CompileError};
use crate::planner::{BuildPlan, NodeState};
use crate::report::{BuildReport, NodeReport, NodeStatus};
use clyde_package::PackageId;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happens to independent work after a package fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop dispatching; unstarted packages are cancelled
    #[default]
    FailFast,
    /// Keep building everything that does not depend on the failure
    ContinueOnError,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum simultaneous compile invocations
    pub concurrency_limit: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Requests cancellation of a running build from any thread
///
/// Packages not yet started are reported as cancelled and results of
/// compiles that finish afterwards are discarded without being cached.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the handle for another run
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress notification
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// A compile was handed to a worker
    Started { package: PackageId },
    /// A package reached its final status
    Finished {
        package: PackageId,
        status: NodeStatus,
    },
}

pub type EventObserver = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

/// Message from a worker to the dispatcher
struct Completion {
    index: usize,
    result: Result<Artifact, CompileError>,
    /// Cancellation was observed before the result could be cached
    discarded: bool,
    duration: Duration,
}

pub struct Scheduler {
    config: SchedulerConfig,
    cache: Arc<ArtifactCache>,
    cancel: CancelHandle,
    observer: Option<EventObserver>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, cache: Arc<ArtifactCache>) -> Self {
        Self {
            config,
            cache,
            cancel: CancelHandle::new(),
            observer: None,
        }
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run every stale package of `plan` through `compiler`
    ///
    /// A package is compiled only after all of its dependencies succeeded,
    /// and never more than `concurrency_limit` compiles run at once.
    /// Compile failures are reported per package; only configuration and
    /// worker pool problems return `Err`.
    pub fn execute<C>(&self, plan: &BuildPlan, compiler: C) -> BuildResult<BuildReport>
    where
        C: Compiler + 'static,
    {
        let limit = self.config.concurrency_limit;
        if limit == 0 {
            return Err(BuildError::InvalidConfig(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(limit)
            .thread_name(|i| format!("clyde-build-{}", i))
            .build()
            .map_err(|e| BuildError::ThreadPool(e.to_string()))?;

        let started = Instant::now();
        let compiler: Arc<dyn Compiler> = Arc::new(compiler);
        let mut run = Run::new(plan, self.observer.clone());
        let (tx, rx) = mpsc::channel::<Completion>();
        let mut in_flight = 0usize;
        let mut halted = false;

        info!(
            "Building {} packages ({} cached) with up to {} jobs",
            plan.len(),
            plan.cached_count(),
            limit
        );

        loop {
            while !halted && !self.cancel.is_cancelled() {
                let next = run
                    .ready
                    .iter()
                    .copied()
                    .find(|&i| plan.nodes()[i].is_cached() || in_flight < limit);
                let Some(index) = next else { break };
                run.ready.remove(&index);

                let node = &plan.nodes()[index];
                match &node.state {
                    NodeState::Cached(artifact) => {
                        debug!("{} is up to date", node.id);
                        run.finish(index, NodeStatus::Cached, Some(artifact.clone()), Duration::ZERO);
                    }
                    NodeState::Stale => {
                        let request = run.request(index);
                        run.emit(BuildEvent::Started {
                            package: node.id.clone(),
                        });
                        debug!("Compiling {} [{}]", node.id, node.fingerprint.short());

                        let compiler = Arc::clone(&compiler);
                        let cache = Arc::clone(&self.cache);
                        let cancel = self.cancel.clone();
                        let tx = tx.clone();
                        pool.spawn(move || {
                            let completion = compile_one(index, request, &*compiler, &cache, &cancel);
                            // The dispatcher outlives every worker it waits on
                            let _ = tx.send(completion);
                        });
                        in_flight += 1;
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            let completion = rx
                .recv()
                .map_err(|_| BuildError::ThreadPool("build workers disconnected".to_string()))?;
            in_flight -= 1;

            let index = completion.index;
            if completion.discarded {
                debug!("Discarding result for {} after cancellation", plan.nodes()[index].id);
                run.finish(index, NodeStatus::Cancelled, None, completion.duration);
                continue;
            }

            match completion.result {
                Ok(artifact) => {
                    run.finish(index, NodeStatus::Built, Some(artifact), completion.duration);
                }
                Err(error) => {
                    error!("{}", error);
                    let failed = plan.nodes()[index].id.clone();
                    run.finish(index, NodeStatus::Failed { error }, None, completion.duration);
                    run.block_dependents(index, &failed);
                    if self.config.failure_policy == FailurePolicy::FailFast {
                        halted = true;
                    }
                }
            }
        }

        let report = run.into_report(started.elapsed());
        if self.cancel.is_cancelled() {
            warn!("Build cancelled: {}", report.summary());
        } else {
            info!("Build finished in {:?}: {}", report.total_time, report.summary());
        }
        Ok(report)
    }
}

/// Compile on a worker thread, caching the result unless cancelled
fn compile_one(
    index: usize,
    request: CompileRequest,
    compiler: &dyn Compiler,
    cache: &ArtifactCache,
    cancel: &CancelHandle,
) -> Completion {
    let started = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| compiler.compile(&request)))
        .unwrap_or_else(|payload| Err(request.fail(panic_message(payload.as_ref()))))
        .map(|artifact| keyed_to(artifact, &request));
    let duration = started.elapsed();

    let discarded = cancel.is_cancelled();
    if let (Ok(artifact), false) = (&result, discarded) {
        if let Err(e) = cache.store(artifact) {
            warn!("Failed to cache {}: {}", artifact.package, e);
        }
    }

    Completion {
        index,
        result,
        discarded,
        duration,
    }
}

/// The artifact as cached: always under the planned package and fingerprint
fn keyed_to(mut artifact: Artifact, request: &CompileRequest) -> Artifact {
    if artifact.package != request.package || artifact.fingerprint != request.fingerprint {
        debug!(
            "{}: compiler returned artifact for {} [{}], storing under [{}]",
            request.package,
            artifact.package,
            artifact.fingerprint.short(),
            request.fingerprint.short()
        );
        artifact.package = request.package.clone();
        artifact.fingerprint = request.fingerprint.clone();
    }
    artifact
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("compiler panicked: {}", detail)
}

/// Dispatcher bookkeeping for one execution
struct Run<'a> {
    plan: &'a BuildPlan,
    observer: Option<EventObserver>,
    /// Unfinished dependency count per node
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    /// Transitive dependencies per node, as plan indices
    transitive: Vec<BTreeSet<usize>>,
    ready: BTreeSet<usize>,
    statuses: Vec<Option<NodeStatus>>,
    artifacts: Vec<Option<Artifact>>,
    durations: Vec<Duration>,
}

impl<'a> Run<'a> {
    fn new(plan: &'a BuildPlan, observer: Option<EventObserver>) -> Self {
        let n = plan.len();
        let mut remaining = vec![0; n];
        let mut dependents = vec![Vec::new(); n];
        let mut transitive: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

        for (i, node) in plan.nodes().iter().enumerate() {
            for dep in &node.dependencies {
                // Plans list dependencies first, so `d < i`
                if let Some(d) = plan.position(dep) {
                    remaining[i] += 1;
                    dependents[d].push(i);
                    let inherited = transitive[d].clone();
                    transitive[i].insert(d);
                    transitive[i].extend(inherited);
                }
            }
        }

        let ready = (0..n).filter(|&i| remaining[i] == 0).collect();
        Self {
            plan,
            observer,
            remaining,
            dependents,
            transitive,
            ready,
            statuses: vec![None; n],
            artifacts: vec![None; n],
            durations: vec![Duration::ZERO; n],
        }
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    fn request(&self, index: usize) -> CompileRequest {
        let node = &self.plan.nodes()[index];
        let manifest = &node.manifest;

        let mut include_dirs = manifest.include_paths();
        let mut dependency_artifacts = Vec::new();
        for &dep in &self.transitive[index] {
            include_dirs.extend(self.plan.nodes()[dep].manifest.include_paths());
            if let Some(artifact) = &self.artifacts[dep] {
                if artifact.kind.is_linkable() {
                    dependency_artifacts.push(artifact.clone());
                }
            }
        }

        CompileRequest {
            package: node.id.clone(),
            kind: manifest.kind,
            fingerprint: node.fingerprint.clone(),
            root: manifest.root.clone(),
            sources: manifest.source_paths(),
            include_dirs,
            dependency_artifacts,
            flags: self.plan.flags().merged_with(manifest),
        }
    }

    fn finish(
        &mut self,
        index: usize,
        status: NodeStatus,
        artifact: Option<Artifact>,
        duration: Duration,
    ) {
        if status.is_success() {
            for &dependent in &self.dependents[index] {
                self.remaining[dependent] -= 1;
                if self.remaining[dependent] == 0 && self.statuses[dependent].is_none() {
                    self.ready.insert(dependent);
                }
            }
        }
        self.emit(BuildEvent::Finished {
            package: self.plan.nodes()[index].id.clone(),
            status: status.clone(),
        });
        self.statuses[index] = Some(status);
        self.artifacts[index] = artifact;
        self.durations[index] = duration;
    }

    /// Mark every transitive dependent of a failed node as blocked
    fn block_dependents(&mut self, index: usize, failed: &PackageId) {
        let mut queue: VecDeque<usize> = self.dependents[index].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if self.statuses[next].is_some() {
                continue;
            }
            self.ready.remove(&next);
            self.finish(
                next,
                NodeStatus::Blocked {
                    by: failed.clone(),
                },
                None,
                Duration::ZERO,
            );
            queue.extend(self.dependents[next].iter().copied());
        }
    }

    fn into_report(mut self, total_time: Duration) -> BuildReport {
        for index in 0..self.plan.len() {
            if self.statuses[index].is_none() {
                self.finish(index, NodeStatus::Cancelled, None, Duration::ZERO);
            }
        }

        let nodes = self
            .plan
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| NodeReport {
                package: node.id.clone(),
                fingerprint: node.fingerprint.clone(),
                status: self.statuses[i].take().unwrap_or(NodeStatus::Cancelled),
                artifact: self.artifacts[i].take(),
                duration: self.durations[i],
            })
            .collect();

        BuildReport { nodes, total_time }
    }
}
