// src/scheduler/instance.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::error;

use crate::env::BuildEnvironment;
use crate::errors::BuildError;
use crate::rules::{NameMatch, Rule};
use crate::scheduler::{BuildContext, BuildFuture, BuildOutcome};

/// Terminal and non-terminal states of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Succeeded,
    Skipped,
    Failed,
}

/// The mutable state of one build request.
///
/// Created when the scheduler accepts a request and mutated only by the
/// single worker evaluating it (plus the nested builds that worker itself
/// issues). Once the worker finishes, the instance is frozen behind an
/// `Arc` and every waiter observes the same result.
pub struct BuildInstance {
    ctx: BuildContext,
    rule: Arc<Rule>,
    name_match: NameMatch,
    byproduct_names: Vec<String>,
    is_temp: bool,
    /// Lower-cased names of this build and its temp-build ancestors; used
    /// to fail circular `start_temp` requests fast instead of deadlocking.
    temp_chain: Vec<String>,

    inputs: Vec<PathBuf>,
    output_path: Option<PathBuf>,
    byproduct_paths: Vec<PathBuf>,

    status: BuildStatus,
    failure: Option<Arc<BuildError>>,
    dependencies: Vec<String>,
    temp_builds: Vec<Arc<BuildInstance>>,
}

impl BuildInstance {
    pub(crate) fn new(
        ctx: BuildContext,
        rule: Arc<Rule>,
        name_match: NameMatch,
        byproduct_names: Vec<String>,
        is_temp: bool,
        temp_chain: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            rule,
            name_match,
            byproduct_names,
            is_temp,
            temp_chain,
            inputs: Vec::new(),
            output_path: None,
            byproduct_paths: Vec::new(),
            status: BuildStatus::Pending,
            failure: None,
            dependencies: Vec::new(),
            temp_builds: Vec::new(),
        }
    }

    /// The requested output name (the pattern's matched text).
    pub fn name(&self) -> &str {
        self.name_match.text()
    }

    /// Substitute this build's capture groups into a template.
    pub fn expand(&self, template: &str) -> String {
        self.name_match.expand(template)
    }

    pub fn name_match(&self) -> &NameMatch {
        &self.name_match
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn env(&self) -> &BuildEnvironment {
        self.ctx.env()
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn is_temp(&self) -> bool {
        self.is_temp
    }

    /// Resolved input paths, in declaration order.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Resolved primary output path; `None` until resolution has run.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Resolved byproduct paths, aligned with [`Self::byproduct_names`].
    pub fn byproduct_paths(&self) -> &[PathBuf] {
        &self.byproduct_paths
    }

    /// Byproduct names with capture groups already substituted.
    pub fn byproduct_names(&self) -> &[String] {
        &self.byproduct_names
    }

    /// Names this build requested via [`Self::start`].
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Completed temporary builds consumed by this build.
    pub fn temp_builds(&self) -> &[Arc<BuildInstance>] {
        &self.temp_builds
    }

    /// The error that failed this build, when status is `Failed`.
    pub fn failure(&self) -> Option<&Arc<BuildError>> {
        self.failure.as_ref()
    }

    /// Request another output as a dependency of this build and continue
    /// without waiting. The dependency is recorded in this build's history
    /// entry, so future skipped runs still re-check its freshness.
    pub fn start(&mut self, name: &str) -> BuildFuture {
        self.dependencies.push(name.to_string());
        self.ctx.start(name)
    }

    /// Build another output synchronously, for embedding or inspection.
    ///
    /// Blocks the current worker until the nested build resolves. The
    /// nested instance is marked temporary and its input fingerprints are
    /// recorded so a change there rebuilds this output too. A failed
    /// nested build marks *this* build failed (checked when the pipeline
    /// finishes) while still handing back whatever was produced; a nested
    /// name already being built higher up this call chain fails fast with
    /// `CircularDependency` instead of deadlocking.
    pub fn start_temp(&mut self, name: &str) -> BuildOutcome {
        let key = name.to_lowercase();
        if self.temp_chain.contains(&key) {
            error!(
                asset = %self.name(),
                nested = %name,
                "temporary build request cycles back into its own chain"
            );
            self.status = BuildStatus::Failed;
            return Err(Arc::new(BuildError::CircularDependency {
                name: name.to_string(),
                requester: self.name().to_string(),
            }));
        }

        let future = self.ctx.start_for_temp(name, self.temp_chain.clone());
        let outcome = self.ctx.block_on(future);

        match &outcome {
            Ok(instance) => {
                if instance.status() == BuildStatus::Failed {
                    self.status = BuildStatus::Failed;
                } else {
                    self.temp_builds.push(instance.clone());
                }
            }
            Err(err) => {
                // A missing rule is the nested caller's problem to handle;
                // anything else (a cycle, a dead worker) poisons this build.
                if !matches!(**err, BuildError::NoMatchingRule(_)) {
                    self.status = BuildStatus::Failed;
                }
            }
        }

        outcome
    }

    pub(crate) fn set_inputs(&mut self, inputs: Vec<PathBuf>) {
        self.inputs = inputs;
    }

    pub(crate) fn set_outputs(&mut self, primary: PathBuf, byproducts: Vec<PathBuf>) {
        self.output_path = Some(primary);
        self.byproduct_paths = byproducts;
    }

    pub(crate) fn set_status(&mut self, status: BuildStatus) {
        self.status = status;
    }

    pub(crate) fn set_failure(&mut self, failure: Arc<BuildError>) {
        self.failure = Some(failure);
    }

    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.ctx.block_on(future)
    }
}

impl fmt::Debug for BuildInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildInstance")
            .field("name", &self.name())
            .field("status", &self.status)
            .field("is_temp", &self.is_temp)
            .field("inputs", &self.inputs)
            .field("output_path", &self.output_path)
            .field("byproducts", &self.byproduct_names)
            .finish_non_exhaustive()
    }
}
