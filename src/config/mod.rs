// src/config/mod.rs

//! TOML configuration surface for the build environment.
//!
//! Rule registration stays API-only (the scripting front-end lives outside
//! this crate); what a config file can set is the environment a run
//! consumes: roots, change detection, resolver selection and run flags.
//!
//! ```toml
//! input_path = "content"
//! output_path = "dist"
//! create_output_directory = true
//! input_change_detection = ["length", "content_hash"]
//! output_change_detection = ["length"]
//! input_resolver = "flatten"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::env::{resolvers, BuildEnvironment, ChangeDetection, DirectoryIndex};
use crate::errors::{BuildError, Result};
use crate::scheduler::ContextOptions;

/// One change-detection attribute, as it appears in config lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionBit {
    Length,
    Timestamp,
    ContentHash,
}

/// Which stock resolver maps logical names to relative paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    #[default]
    PassThrough,
    /// Case-insensitive flattened lookup anywhere under the input root.
    /// Input side only.
    Flatten,
    /// Dots in the file stem become directory separators.
    Namespaced,
}

/// The deserialized configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,

    /// Defaults to the system temp directory.
    #[serde(default)]
    pub temp_path: Option<PathBuf>,

    #[serde(default)]
    pub create_output_directory: bool,

    /// Ignore the persisted history and rebuild everything this run.
    #[serde(default)]
    pub full_rebuild: bool,

    #[serde(default = "default_input_detection")]
    pub input_change_detection: Vec<DetectionBit>,

    #[serde(default = "default_output_detection")]
    pub output_change_detection: Vec<DetectionBit>,

    #[serde(default)]
    pub input_resolver: ResolverKind,

    #[serde(default)]
    pub output_resolver: ResolverKind,
}

fn default_input_detection() -> Vec<DetectionBit> {
    vec![DetectionBit::Length, DetectionBit::ContentHash]
}

fn default_output_detection() -> Vec<DetectionBit> {
    vec![DetectionBit::Length]
}

/// Read and deserialize a configuration file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<EnvConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: EnvConfig = toml::from_str(&contents)?;
    Ok(config)
}

impl EnvConfig {
    /// Materialize a [`BuildEnvironment`] from this configuration.
    ///
    /// Selecting the flatten resolver walks the input root once, here, to
    /// build its index.
    pub fn to_environment(&self) -> Result<BuildEnvironment> {
        let mut env = BuildEnvironment::new(&self.input_path, &self.output_path);

        if let Some(temp) = &self.temp_path {
            env.temp_path = temp.clone();
        }
        env.create_output_directory = self.create_output_directory;
        env.input_change_detection = to_detection(&self.input_change_detection);
        env.output_change_detection = to_detection(&self.output_change_detection);

        env.input_resolver = match self.input_resolver {
            ResolverKind::PassThrough => resolvers::pass_through(),
            ResolverKind::Namespaced => resolvers::namespaced(),
            ResolverKind::Flatten => {
                resolvers::flatten(DirectoryIndex::build(&self.input_path)?)
            }
        };
        env.output_resolver = match self.output_resolver {
            ResolverKind::PassThrough => resolvers::pass_through(),
            ResolverKind::Namespaced => resolvers::namespaced(),
            ResolverKind::Flatten => {
                return Err(BuildError::Config(
                    "the flatten resolver searches the input root and cannot name outputs"
                        .to_string(),
                ));
            }
        };

        Ok(env)
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            full_rebuild: self.full_rebuild,
        }
    }
}

fn to_detection(bits: &[DetectionBit]) -> ChangeDetection {
    let mut detection = ChangeDetection::NONE;
    for bit in bits {
        match bit {
            DetectionBit::Length => detection.length = true,
            DetectionBit::Timestamp => detection.timestamp = true,
            DetectionBit::ContentHash => detection.content_hash = true,
        }
    }
    detection
}
