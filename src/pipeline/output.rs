// src/pipeline/output.rs

use crate::errors::{BuildError, Result};
use crate::pipeline::Artifact;
use crate::rules::DeclSite;
use crate::scheduler::BuildInstance;

/// The sink stage: pairs the pipeline's final artifacts with the resolved
/// output paths and writes them out.
pub struct OutputStage {
    decl_site: DeclSite,
}

impl OutputStage {
    pub(crate) fn new(decl_site: DeclSite) -> Self {
        Self { decl_site }
    }

    pub fn decl_site(&self) -> DeclSite {
        self.decl_site
    }

    pub fn structural_hash(&self) -> String {
        "output".to_string()
    }

    /// Resolve the primary output and every byproduct name through the
    /// environment. Runs before the pipeline, together with input
    /// resolution, so an unresolvable output fails the build early.
    pub(crate) fn resolve_names(&self, instance: &mut BuildInstance) -> Result<()> {
        let byproduct_names = instance.byproduct_names().to_vec();
        let mut byproduct_paths = Vec::with_capacity(byproduct_names.len());

        for name in &byproduct_names {
            let path = instance.env().resolve_output(name).ok_or_else(|| {
                BuildError::UnresolvedOutput {
                    name: name.clone(),
                    site: self.decl_site,
                }
            })?;
            byproduct_paths.push(path);
        }

        let primary = instance
            .env()
            .resolve_output(instance.name())
            .ok_or_else(|| BuildError::UnresolvedOutput {
                name: instance.name().to_string(),
                site: self.decl_site,
            })?;

        instance.set_outputs(primary, byproduct_paths);
        Ok(())
    }

    /// Write each artifact to its output path. The artifact count must
    /// equal one (the primary output) plus the number of byproducts.
    pub(crate) fn evaluate(
        &self,
        instance: &BuildInstance,
        inputs: Vec<Artifact>,
    ) -> Result<Vec<Artifact>> {
        let primary = instance.output_path().ok_or_else(|| {
            BuildError::UnresolvedOutput {
                name: instance.name().to_string(),
                site: self.decl_site,
            }
        })?;

        let expected = 1 + instance.byproduct_paths().len();
        if inputs.len() != expected {
            return Err(BuildError::ArityMismatch {
                asset: instance.name().to_string(),
                produced: inputs.len(),
                expected,
                site: self.decl_site,
            });
        }

        let destinations = std::iter::once(primary).chain(
            instance
                .byproduct_paths()
                .iter()
                .map(std::path::PathBuf::as_path),
        );

        for (artifact, dest) in inputs.iter().zip(destinations) {
            artifact.write_to(dest)?;
        }

        Ok(Vec::new())
    }
}
