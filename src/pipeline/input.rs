// src/pipeline/input.rs

use std::fs;

use anyhow::Context;

use crate::errors::{BuildError, Result};
use crate::pipeline::Artifact;
use crate::rules::DeclSite;
use crate::scheduler::BuildInstance;

/// The source stage: resolves raw input name templates to filesystem paths
/// and hands them to the next stage.
pub struct InputStage {
    templates: Vec<String>,
    decl_site: DeclSite,
}

impl InputStage {
    pub(crate) fn new(templates: Vec<String>, decl_site: DeclSite) -> Self {
        Self {
            templates,
            decl_site,
        }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn structural_hash(&self) -> String {
        "input".to_string()
    }

    /// Substitute match groups into each template and resolve the result
    /// through the environment. All inputs must resolve or the build fails
    /// before any stage runs.
    pub(crate) fn resolve_names(&self, instance: &mut BuildInstance) -> Result<()> {
        let mut paths = Vec::with_capacity(self.templates.len());

        for template in &self.templates {
            let full_name = instance.expand(template);
            let path = instance.env().resolve_input(&full_name).ok_or_else(|| {
                BuildError::UnresolvedInput {
                    name: full_name.clone(),
                    site: self.decl_site,
                }
            })?;
            paths.push(path);
        }

        instance.set_inputs(paths);
        Ok(())
    }

    /// Open the resolved inputs as artifacts.
    ///
    /// Each input passes through as its on-disk path; downstream stages
    /// read bytes only when they actually need them. Existence is checked
    /// here so a vanished input fails the build at the source stage.
    pub(crate) fn evaluate(&self, instance: &BuildInstance) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(instance.inputs().len());

        for path in instance.inputs() {
            fs::metadata(path).with_context(|| format!("opening input {path:?}"))?;
            artifacts.push(Artifact::File(path.clone()));
        }

        Ok(artifacts)
    }
}
