// src/pipeline/mod.rs

//! The pipeline graph: a source stage that opens named inputs, zero or
//! more transform stages, and a sink stage that writes resolved output
//! paths.
//!
//! Pipelines are composed sink-outward through [`PipelineBuilder`]
//! (`build(...).using(...).run(...).from(...)`) and evaluated bottom-up,
//! source to sink. The chain is stored as an ordered sequence, walkable
//! from either end; the source and sink are fixed by construction, so the
//! shape invariant "input first, output last" holds by type.

pub mod artifact;
mod external;
mod input;
mod output;
mod processor;

pub use artifact::Artifact;
pub use external::{ExternalStage, RunOptions};
pub use input::InputStage;
pub use output::OutputStage;
pub use processor::{named, Processor, ProcessorStage};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{BuildError, Result};
use crate::rules::{DeclSite, Rule, RulePattern};
use crate::scheduler::{BuildContext, BuildInstance};

/// Identifies a stage's kind for pipeline-shape comparison in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Input,
    Processor,
    External,
    Output,
}

/// A transform between the source and the sink: either a user processor
/// callback or an external-process invocation.
pub enum TransformStage {
    Processor(ProcessorStage),
    External(ExternalStage),
}

impl TransformStage {
    pub fn kind(&self) -> StageKind {
        match self {
            TransformStage::Processor(_) => StageKind::Processor,
            TransformStage::External(_) => StageKind::External,
        }
    }

    /// Stable identifier for this stage, combining its kind with any
    /// embedded processor identity. Equal values across runs mean "no
    /// pipeline shape change" at this position.
    pub fn structural_hash(&self) -> String {
        match self {
            TransformStage::Processor(stage) => stage.structural_hash(),
            TransformStage::External(stage) => stage.structural_hash(),
        }
    }

    pub(crate) fn evaluate(
        &self,
        instance: &mut BuildInstance,
        inputs: Vec<Artifact>,
    ) -> Result<Vec<Artifact>> {
        match self {
            TransformStage::Processor(stage) => stage.evaluate(instance, inputs),
            TransformStage::External(stage) => stage.evaluate(instance, inputs),
        }
    }
}

/// An ordered chain of stages from source to sink.
pub struct Pipeline {
    input: InputStage,
    transforms: Vec<TransformStage>,
    output: OutputStage,
}

impl Pipeline {
    pub(crate) fn new(
        input: InputStage,
        transforms: Vec<TransformStage>,
        output: OutputStage,
    ) -> Self {
        Self {
            input,
            transforms,
            output,
        }
    }

    pub fn input(&self) -> &InputStage {
        &self.input
    }

    pub fn transforms(&self) -> &[TransformStage] {
        &self.transforms
    }

    pub fn output(&self) -> &OutputStage {
        &self.output
    }

    /// Number of stages, source and sink included.
    pub fn len(&self) -> usize {
        self.transforms.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Stage kinds in evaluation order.
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        let mut kinds = Vec::with_capacity(self.len());
        kinds.push(StageKind::Input);
        kinds.extend(self.transforms.iter().map(TransformStage::kind));
        kinds.push(StageKind::Output);
        kinds
    }

    /// Structural hashes aligned with [`Pipeline::stage_kinds`].
    pub fn stage_hashes(&self) -> Vec<String> {
        let mut hashes = Vec::with_capacity(self.len());
        hashes.push(self.input.structural_hash());
        hashes.extend(self.transforms.iter().map(TransformStage::structural_hash));
        hashes.push(self.output.structural_hash());
        hashes
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        Self::new(
            InputStage::new(vec!["$0".to_string()], DeclSite::here()),
            Vec::new(),
            OutputStage::new(DeclSite::here()),
        )
    }
}

/// Composes a rule's pipeline sink-outward.
///
/// Obtained from [`BuildContext::build`]; `using`/`run` insert transform
/// stages *below* the stages declared so far (the last one declared runs
/// first), and [`PipelineBuilder::from`] attaches the source and registers
/// the finished rule.
#[must_use = "a pipeline builder does nothing until `.from(...)` registers the rule"]
pub struct PipelineBuilder {
    ctx: BuildContext,
    pattern: String,
    priority: i32,
    byproducts: Vec<String>,
    transforms: Vec<TransformStage>,
    decl_site: DeclSite,
}

impl PipelineBuilder {
    pub(crate) fn new(
        ctx: BuildContext,
        pattern: &str,
        priority: i32,
        byproducts: &[&str],
        decl_site: DeclSite,
    ) -> Self {
        Self {
            ctx,
            pattern: pattern.to_string(),
            priority,
            byproducts: byproducts.iter().map(|b| b.to_string()).collect(),
            transforms: Vec::new(),
            decl_site,
        }
    }

    /// Insert a processor stage below the stages declared so far.
    #[track_caller]
    pub fn using(mut self, processor: impl Processor) -> Self {
        self.transforms.push(TransformStage::Processor(ProcessorStage::new(
            processor,
            DeclSite::here(),
        )));
        self
    }

    /// Insert an external-process stage below the stages declared so far.
    ///
    /// `args_template` supports `$N` capture references and the
    /// `$(Output)`, `$(Output[n])`, `$(Input)`, `$(Input[n])`, `$(Name)`,
    /// `$(TempName)` and `$(TempDir)` tokens; the substituted string is
    /// split on whitespace to form the argument vector. `results` name the
    /// files the tool leaves behind, substituted the same way and opened as
    /// the stage's output artifacts.
    #[track_caller]
    pub fn run(
        mut self,
        program: &str,
        args_template: &str,
        options: RunOptions,
        results: &[&str],
    ) -> Self {
        self.transforms.push(TransformStage::External(ExternalStage::new(
            program,
            args_template,
            options,
            results.iter().map(|r| r.to_string()).collect(),
            DeclSite::here(),
        )));
        self
    }

    /// Attach the source stage and register the finished rule.
    ///
    /// Input name templates are substituted against the pattern match at
    /// build time, so `&["$1.png"]` under pattern `"*.tex"` opens
    /// `foo.png` when `foo.tex` is requested.
    #[track_caller]
    pub fn from(self, inputs: &[&str]) -> Result<()> {
        if inputs.is_empty() {
            return Err(BuildError::Config(format!(
                "rule '{}' declares no inputs ({})",
                self.pattern, self.decl_site
            )));
        }
        for stage in &self.transforms {
            if let TransformStage::External(external) = stage {
                if external.results().is_empty() {
                    return Err(BuildError::Config(format!(
                        "external stage '{}' declares no results ({})",
                        external.program(),
                        external.decl_site()
                    )));
                }
            }
        }

        let input = InputStage::new(
            inputs.iter().map(|i| i.to_string()).collect(),
            DeclSite::here(),
        );

        // Declaration order is sink-outward; evaluation order is
        // source-to-sink.
        let mut transforms = self.transforms;
        transforms.reverse();

        let pipeline = Pipeline::new(input, transforms, OutputStage::new(self.decl_site));
        let rule = Rule::new(
            RulePattern::compile(&self.pattern)?,
            self.priority,
            self.byproducts,
            pipeline,
            self.decl_site,
        );

        self.ctx.register_rule(Arc::new(rule));
        Ok(())
    }
}
