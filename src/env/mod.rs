// src/env/mod.rs

//! The build environment: filesystem roots, name resolvers and change
//! detection settings the core consumes. Hosts configure this directly or
//! through [`crate::config::EnvConfig`].

pub mod dir_index;
pub mod resolvers;

pub use dir_index::DirectoryIndex;
pub use resolvers::Resolver;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::error;

/// Which attributes of a file participate in change detection.
///
/// Inputs and outputs are configured independently; all bits clear disables
/// the corresponding checks entirely (files are always considered
/// unchanged).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetection {
    pub length: bool,
    pub timestamp: bool,
    pub content_hash: bool,
}

impl ChangeDetection {
    pub const NONE: Self = Self {
        length: false,
        timestamp: false,
        content_hash: false,
    };

    /// Default for inputs: a changed length or changed bytes forces a
    /// rebuild; a touched timestamp alone does not.
    pub const LENGTH_AND_HASH: Self = Self {
        length: true,
        timestamp: false,
        content_hash: true,
    };

    /// Default for outputs: cheap length comparison only.
    pub const LENGTH: Self = Self {
        length: true,
        timestamp: false,
        content_hash: false,
    };

    pub const CONTENT_HASH: Self = Self {
        length: false,
        timestamp: false,
        content_hash: true,
    };

    pub fn is_none(&self) -> bool {
        !(self.length || self.timestamp || self.content_hash)
    }
}

/// Filesystem roots and resolver functions for one build run.
///
/// `resolve_input`/`resolve_output` mirror the registration-time contract:
/// they return `None` (after logging the cause) rather than failing hard,
/// and the pipeline stage that asked turns that into the appropriate
/// `UnresolvedInput`/`UnresolvedOutput` error.
pub struct BuildEnvironment {
    /// Root directory under which input names resolve.
    pub input_path: PathBuf,
    /// Root directory under which output names resolve.
    pub output_path: PathBuf,
    /// Root for temporary materializations (`$(TempDir)`, `$(TempName)`).
    pub temp_path: PathBuf,
    /// Maps a logical input name to a path relative to `input_path`.
    pub input_resolver: Resolver,
    /// Maps a logical output name to a path relative to `output_path`.
    pub output_resolver: Resolver,
    pub input_change_detection: ChangeDetection,
    pub output_change_detection: ChangeDetection,
    /// Create `output_path` on first resolution instead of erroring when it
    /// does not exist.
    pub create_output_directory: bool,

    /// Directories touched by resolution; the host's file watcher (outside
    /// this crate) watches these to drive continuous re-runs.
    probed: Mutex<BTreeSet<PathBuf>>,
}

impl BuildEnvironment {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        let input_path = input_path.into();
        let probed = Mutex::new(BTreeSet::from([input_path.clone()]));

        Self {
            input_path,
            output_path: output_path.into(),
            temp_path: std::env::temp_dir(),
            input_resolver: resolvers::pass_through(),
            output_resolver: resolvers::pass_through(),
            input_change_detection: ChangeDetection::LENGTH_AND_HASH,
            output_change_detection: ChangeDetection::LENGTH,
            create_output_directory: false,
            probed,
        }
    }

    /// Resolve a logical input name to a full path under the input root.
    pub fn resolve_input(&self, name: &str) -> Option<PathBuf> {
        if !self.input_path.is_dir() {
            error!(path = ?self.input_path, "input path does not exist");
            return None;
        }

        let resolved = (self.input_resolver)(name)?;
        Some(self.input_path.join(resolved))
    }

    /// Resolve a logical output name to a full path under the output root,
    /// recording the containing directory as probed.
    pub fn resolve_output(&self, name: &str) -> Option<PathBuf> {
        if !self.output_path.is_dir() {
            if self.create_output_directory {
                if let Err(err) = fs::create_dir_all(&self.output_path) {
                    error!(path = ?self.output_path, error = %err, "could not create output path");
                    return None;
                }
            } else {
                error!(path = ?self.output_path, "output path does not exist");
                return None;
            }
        }

        let resolved = (self.output_resolver)(name)?;
        let path = self.output_path.join(resolved);
        if let Some(parent) = path.parent() {
            self.record_probed(parent);
        }

        Some(path)
    }

    /// Resolve a logical name to a path under the temp root. Used by
    /// external stages for `$(TempName)`.
    pub fn resolve_temp(&self, name: &str) -> Option<PathBuf> {
        let resolved = (self.output_resolver)(name)?;
        Some(self.temp_path.join(resolved))
    }

    /// Distinct directories touched so far by name resolution.
    pub fn probed_paths(&self) -> Vec<PathBuf> {
        let probed = self.probed.lock().unwrap_or_else(|e| e.into_inner());
        probed.iter().cloned().collect()
    }

    fn record_probed(&self, path: &Path) {
        let mut probed = self.probed.lock().unwrap_or_else(|e| e.into_inner());
        probed.insert(path.to_path_buf());
    }
}

impl fmt::Debug for BuildEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildEnvironment")
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("temp_path", &self.temp_path)
            .field("input_change_detection", &self.input_change_detection)
            .field("output_change_detection", &self.output_change_detection)
            .field("create_output_directory", &self.create_output_directory)
            .finish_non_exhaustive()
    }
}
