// src/scheduler/mod.rs

//! The top-level build context: accepts requests, deduplicates in-flight
//! builds, runs pipelines on the blocking worker pool and drives the
//! history.
//!
//! Every request for a not-yet-seen name spawns exactly one unit of work;
//! concurrent requests for the same name (or one of its byproducts) share
//! that unit's future and observe the same resulting instance.

mod instance;

pub use instance::{BuildInstance, BuildStatus};

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::env::BuildEnvironment;
use crate::errors::{BuildError, Result};
use crate::history::History;
use crate::pipeline::PipelineBuilder;
use crate::rules::{DeclSite, NameMatch, Rule, RuleSet};

/// What a build future resolves to: the shared, frozen instance, or the
/// error that prevented an instance from existing at all (no matching
/// rule, dead worker). Pipeline failures resolve `Ok` with a `Failed`
/// status; inspect [`BuildInstance::status`].
pub type BuildOutcome = std::result::Result<Arc<BuildInstance>, Arc<BuildError>>;

/// A cloneable handle to an in-flight (or finished) build.
pub type BuildFuture = Shared<BoxFuture<'static, BuildOutcome>>;

/// Options governing a whole run.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Ignore the persisted history and rebuild everything.
    pub full_rebuild: bool,
}

/// The top-level context: rule store, environment, history and the
/// in-flight build map. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct BuildContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    env: BuildEnvironment,
    history: History,
    options: ContextOptions,
    rules: RwLock<RuleSet>,
    running: Mutex<HashMap<String, BuildFuture>>,
    built_assets: Mutex<BTreeSet<String>>,
    all_assets: Mutex<BTreeSet<String>>,
    run_again: AtomicBool,
    runtime: Handle,
}

impl BuildContext {
    /// Create a context. Must be called from within a tokio runtime; the
    /// runtime's blocking pool is where pipelines execute.
    pub fn new(
        env: BuildEnvironment,
        history: History,
        options: ContextOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            BuildError::Config("BuildContext must be created inside a tokio runtime".to_string())
        })?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                env,
                history,
                options,
                rules: RwLock::new(RuleSet::default()),
                running: Mutex::new(HashMap::new()),
                built_assets: Mutex::new(BTreeSet::new()),
                all_assets: Mutex::new(BTreeSet::new()),
                run_again: AtomicBool::new(false),
                runtime,
            }),
        })
    }

    /// Begin declaring a rule: `ctx.build("*.bin", 0, &["$1.meta"])
    /// .using(...).from(&["$1.src"])?`.
    #[track_caller]
    pub fn build(&self, pattern: &str, priority: i32, byproducts: &[&str]) -> PipelineBuilder {
        PipelineBuilder::new(self.clone(), pattern, priority, byproducts, DeclSite::here())
    }

    pub(crate) fn register_rule(&self, rule: Arc<Rule>) {
        debug!(rule = ?rule, "rule registered");
        let mut rules = self.inner.rules.write().unwrap_or_else(|e| e.into_inner());
        rules.register(rule);
    }

    /// Request a build of `name`.
    ///
    /// The first request for a name spawns its pipeline; every further
    /// request (for the name or for one of its byproducts) joins the
    /// same execution and resolves to the same instance.
    pub fn start(&self, name: &str) -> BuildFuture {
        self.start_inner(name, false, Vec::new())
    }

    pub(crate) fn start_for_temp(&self, name: &str, parent_chain: Vec<String>) -> BuildFuture {
        self.start_inner(name, true, parent_chain)
    }

    fn start_inner(&self, name: &str, is_temp: bool, parent_chain: Vec<String>) -> BuildFuture {
        let matched = {
            let rules = self.inner.rules.read().unwrap_or_else(|e| e.into_inner());
            rules.best_match(name)
        };
        let Some((rule, name_match)) = matched else {
            error!(asset = %name, "no applicable rule found for asset");
            let err = Arc::new(BuildError::NoMatchingRule(name.to_string()));
            return future::ready(Err(err)).boxed().shared();
        };

        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = running.get(name) {
            return existing.clone();
        }

        let byproduct_names: Vec<String> = rule
            .byproducts()
            .iter()
            .map(|template| name_match.expand(template))
            .collect();

        let mut chain = parent_chain;
        chain.push(name.to_lowercase());

        let ctx = self.clone();
        let build_name = name.to_string();
        let build_rule = rule.clone();
        let build_byproducts = byproduct_names.clone();
        let worker = self.inner.runtime.spawn_blocking(move || {
            ctx.run_build(
                build_name,
                build_rule,
                name_match,
                build_byproducts,
                is_temp,
                chain,
            )
        });

        let cleanup = self.clone();
        let primary = name.to_string();
        let mut owned_names = vec![name.to_string()];
        owned_names.extend(byproduct_names.iter().cloned());

        let fut: BuildFuture = async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(asset = %primary, error = %err, "build worker terminated abnormally");
                    Err(Arc::new(BuildError::WorkerPanic(primary.clone())))
                }
            };
            cleanup.remove_in_flight(&owned_names);
            outcome
        }
        .boxed()
        .shared();

        running.insert(name.to_string(), fut.clone());
        for byproduct in &byproduct_names {
            running
                .entry(byproduct.clone())
                .or_insert_with(|| fut.clone());
        }

        debug!(asset = %name, byproducts = ?byproduct_names, temp = is_temp, "build scheduled");
        fut
    }

    /// Block until no builds remain in flight.
    ///
    /// Re-samples the in-flight map after every wave: a running processor
    /// may request further builds at any point.
    pub async fn wait_all(&self) {
        loop {
            let pending: Vec<BuildFuture> = {
                let running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
                running.values().cloned().collect()
            };

            if pending.is_empty() {
                break;
            }

            future::join_all(pending).await;
        }
    }

    /// Persist the history and hand back the distinct names built (not
    /// skipped) during this run, for the host's completion notifier.
    pub fn finish(&self) -> Result<Vec<String>> {
        self.inner.history.save()?;

        let built = self
            .inner
            .built_assets
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(built.iter().cloned().collect())
    }

    /// Distinct names built during this run (excluding skipped builds).
    pub fn built_assets(&self) -> Vec<String> {
        let built = self
            .inner
            .built_assets
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        built.iter().cloned().collect()
    }

    /// Distinct names touched during this run, skipped builds included.
    pub fn all_assets(&self) -> Vec<String> {
        let all = self
            .inner
            .all_assets
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        all.iter().cloned().collect()
    }

    pub fn env(&self) -> &BuildEnvironment {
        &self.inner.env
    }

    pub fn history(&self) -> &History {
        &self.inner.history
    }

    /// Directories the environment resolved through; the host's watcher
    /// observes these in continuous mode.
    pub fn probed_paths(&self) -> Vec<PathBuf> {
        self.inner.env.probed_paths()
    }

    /// Ask the host to run the whole build again once this run finishes
    /// (continuous-mode handshake).
    pub fn run_again(&self) {
        self.inner.run_again.store(true, Ordering::Relaxed);
    }

    pub fn should_run_again(&self) -> bool {
        self.inner.run_again.load(Ordering::Relaxed)
    }

    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.inner.runtime.block_on(future)
    }

    fn run_build(
        &self,
        name: String,
        rule: Arc<Rule>,
        name_match: NameMatch,
        byproduct_names: Vec<String>,
        is_temp: bool,
        chain: Vec<String>,
    ) -> BuildOutcome {
        let mut instance = BuildInstance::new(
            self.clone(),
            rule.clone(),
            name_match,
            byproduct_names,
            is_temp,
            chain,
        );
        let pipeline = rule.pipeline();

        // Resolve concrete paths for both ends of the chain before
        // deciding anything else.
        if let Err(err) = pipeline.input().resolve_names(&mut instance) {
            return self.build_failed(instance, err);
        }
        if let Err(err) = pipeline.output().resolve_names(&mut instance) {
            return self.build_failed(instance, err);
        }

        if !self.inner.options.full_rebuild && !self.inner.history.should_build(&instance) {
            self.record_asset(instance.name());
            // Skipping this build must not skip its dependents' own
            // freshness checks.
            for dependency in self.inner.history.dependencies_of(instance.name()) {
                self.record_asset(&dependency);
                let _ = self.start(&dependency);
            }

            info!(asset = %name, "skipping (up to date)");
            instance.set_status(BuildStatus::Skipped);
            return Ok(Arc::new(instance));
        }

        // Walk the pipeline bottom-up, feeding each stage's artifacts to
        // the next.
        let mut artifacts = match pipeline.input().evaluate(&instance) {
            Ok(artifacts) => artifacts,
            Err(err) => return self.build_failed(instance, err),
        };
        for stage in pipeline.transforms() {
            match stage.evaluate(&mut instance, artifacts) {
                Ok(next) => artifacts = next,
                Err(err) => return self.build_failed(instance, err),
            }
        }

        if let Err(err) = pipeline.output().evaluate(&instance, artifacts) {
            if instance.is_temp() {
                // A temporary build's caller may only need the partial
                // artifacts produced before the sink.
                debug!(
                    asset = %name,
                    error = %err,
                    "sink failed for temporary build; returning partial result"
                );
                return Ok(Arc::new(instance));
            }
            return self.build_failed(instance, err);
        }

        if instance.status() == BuildStatus::Failed {
            return self.build_failed(instance, BuildError::TemporaryBuildFailed(name));
        }

        if let Err(err) = self.inner.history.build_succeeded(&instance) {
            warn!(
                asset = %name,
                error = %err,
                "could not snapshot build fingerprint; next run rebuilds"
            );
            self.inner.history.build_failed(&name);
        }

        self.record_built(instance.name());
        self.record_asset(instance.name());
        for byproduct in instance.byproduct_names() {
            self.record_built(byproduct);
            self.record_asset(byproduct);
        }

        info!(asset = %name, "build successful");
        instance.set_status(BuildStatus::Succeeded);
        Ok(Arc::new(instance))
    }

    fn build_failed(&self, mut instance: BuildInstance, err: BuildError) -> BuildOutcome {
        self.inner.history.build_failed(instance.name());
        error!(asset = %instance.name(), error = %err, "build failed");
        instance.set_status(BuildStatus::Failed);
        instance.set_failure(Arc::new(err));
        Ok(Arc::new(instance))
    }

    fn remove_in_flight(&self, names: &[String]) {
        let mut running = self.inner.running.lock().unwrap_or_else(|e| e.into_inner());
        for name in names {
            running.remove(name);
        }
    }

    fn record_built(&self, name: &str) {
        let mut built = self
            .inner
            .built_assets
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        built.insert(name.to_string());
    }

    fn record_asset(&self, name: &str) {
        let mut all = self
            .inner
            .all_assets
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        all.insert(name.to_string());
    }
}
