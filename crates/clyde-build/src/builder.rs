//! Build orchestration: resolve, plan, execute
use crate::cache::ArtifactCache;
use crate::compiler::Compiler;
use crate::error::BuildResult;
use crate::fingerprint::{BuildFlags, CompilerInfo, FingerprintInputs, FsSourceHasher, SourceHasher};
use crate::planner::{BuildPlan, Planner};
use crate::report::BuildReport;
use crate::scheduler::{CancelHandle, EventObserver, FailurePolicy, Scheduler, SchedulerConfig};

use clyde_config::{Config, ResolverPolicy};
use clyde_package::{
    DependencyGraph, Lockfile, Manifest, ManifestLookup, ResolveOptions, Resolver, SelectionPolicy,
};
use log::info;
use std::sync::Arc;

/// Build configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Maximum simultaneous compile invocations
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
    /// Toolchain identity and global flags
    pub flags: BuildFlags,
    pub selection_policy: SelectionPolicy,
    /// Pinned versions preferred during resolution
    pub lockfile: Option<Lockfile>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: SchedulerConfig::default().concurrency_limit,
            failure_policy: FailurePolicy::FailFast,
            flags: BuildFlags::default(),
            selection_policy: SelectionPolicy::Highest,
            lockfile: None,
        }
    }
}

impl BuildConfig {
    /// Derive build settings from user configuration
    pub fn from_config(config: &Config) -> Self {
        let compiler = config.compiler();
        Self {
            jobs: config.jobs(),
            failure_policy: if config.keep_going() {
                FailurePolicy::ContinueOnError
            } else {
                FailurePolicy::FailFast
            },
            flags: BuildFlags::new()
                .with_compiler(CompilerInfo::new(compiler.name, compiler.version, compiler.target))
                .with_cflags(config.cflags()),
            selection_policy: match config.resolver_policy() {
                ResolverPolicy::Highest => SelectionPolicy::Highest,
                ResolverPolicy::FirstFound => SelectionPolicy::FirstFound,
            },
            lockfile: None,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_flags(mut self, flags: BuildFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_lockfile(mut self, lockfile: Lockfile) -> Self {
        self.lockfile = Some(lockfile);
        self
    }

    fn resolve_options(&self) -> ResolveOptions {
        let options = ResolveOptions::default().with_policy(self.selection_policy);
        match &self.lockfile {
            Some(lockfile) => options.with_lockfile(lockfile),
            None => options,
        }
    }
}

/// Main builder for orchestrating builds
pub struct Builder {
    config: BuildConfig,
    cache: Arc<ArtifactCache>,
    hasher: Arc<dyn SourceHasher>,
    observer: Option<EventObserver>,
    cancel: CancelHandle,
}

impl Builder {
    /// Builder with a process-local cache
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            cache: Arc::new(ArtifactCache::in_memory()),
            hasher: Arc::new(FsSourceHasher),
            observer: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Builder using the configured on-disk cache
    pub fn from_config(config: &Config) -> BuildResult<Self> {
        let cache = ArtifactCache::open(config.cache_dir()?)?;
        Ok(Self::new(BuildConfig::from_config(config)).with_cache(Arc::new(cache)))
    }

    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_source_hasher(mut self, hasher: Arc<dyn SourceHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Handle that cancels the running build, or the next one if none is running
    ///
    /// The handle is re-armed when that build returns.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Resolve the dependency graph of `root`
    pub fn resolve(&self, root: &Manifest, lookup: &dyn ManifestLookup) -> BuildResult<DependencyGraph> {
        let graph = Resolver::new(lookup)
            .with_options(self.config.resolve_options())
            .resolve(root)?;
        Ok(graph)
    }

    /// Fingerprint a resolved graph against the cache
    pub fn plan(&self, graph: &DependencyGraph) -> BuildResult<BuildPlan> {
        let inputs = FingerprintInputs::new(self.config.flags.clone()).with_hasher(Arc::clone(&self.hasher));
        Planner::plan(graph, &inputs, &self.cache)
    }

    /// Execute a plan
    pub fn execute<C>(&self, plan: &BuildPlan, compiler: C) -> BuildResult<BuildReport>
    where
        C: Compiler + 'static,
    {
        let mut scheduler = Scheduler::new(
            SchedulerConfig {
                concurrency_limit: self.config.jobs,
                failure_policy: self.config.failure_policy,
            },
            Arc::clone(&self.cache),
        )
        .with_cancel_handle(self.cancel.clone());
        if let Some(observer) = &self.observer {
            scheduler = scheduler.with_observer(Arc::clone(observer));
        }
        let report = scheduler.execute(plan, compiler);
        self.cancel.reset();
        report
    }

    /// Resolve, plan and build `root` and everything it depends on
    ///
    /// Resolution errors abort before anything is compiled.
    pub fn build<C>(&self, root: &Manifest, lookup: &dyn ManifestLookup, compiler: C) -> BuildResult<BuildReport>
    where
        C: Compiler + 'static,
    {
        info!("Building {}", root.id());
        let graph = self.resolve(root, lookup)?;
        let plan = self.plan(&graph)?;
        self.execute(&plan, compiler)
    }
}
