// src/history/mod.rs

//! Persisted fingerprints of successful builds and the skip-vs-rebuild
//! decision engine.
//!
//! One entry per output name (case-insensitive) records the pipeline shape
//! and file snapshots of the last successful build. `should_build` walks a
//! short-circuit chain of comparisons from cheapest to most expensive; any
//! mismatch means "build". Failed builds delete their entry so the next
//! run retries unconditionally; the map never holds a partially written
//! entry.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::env::ChangeDetection;
use crate::errors::Result;
use crate::hashing;
use crate::pipeline::StageKind;
use crate::scheduler::BuildInstance;

/// Seed for content fingerprints stored in file entries.
const CONTENT_SEED: u32 = 144;
/// Seed for deriving the history file name from the build-script identity.
const FILE_NAME_SEED: u32 = 0x9e37_79b9;

/// Snapshot of a file at the moment a build succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub length: u64,
    pub modified: SystemTime,
    /// Only present when the content-hash detection bit was set at save
    /// time, so unhashed runs never pay the read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Fingerprint of a temporary build consumed (not persisted as a
/// first-class output) during a prior run. Mirrors the input snapshots and
/// recurses into the temporary builds *it* consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempFingerprint {
    pub input_paths: Vec<PathBuf>,
    pub inputs: Vec<FileEntry>,
    pub temp_dependencies: Vec<TempFingerprint>,
}

/// Everything remembered about one successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Lower-cased byproduct names in the order they were produced.
    /// Equality against a current build uses set semantics, but the order
    /// here is what aligns `output_cache[1..]` with its files.
    pub byproducts: Vec<String>,
    pub stage_kinds: Vec<StageKind>,
    pub stage_hashes: Vec<String>,
    pub input_cache: Vec<FileEntry>,
    /// `[0]` is the primary output; the rest align with `byproducts`.
    pub output_cache: Vec<FileEntry>,
    /// Names this build requested as dependencies, re-triggered even when
    /// the build itself is skipped.
    pub dependencies: Vec<String>,
    pub temp_dependencies: Vec<TempFingerprint>,
}

/// The persisted build history for one build script.
pub struct History {
    path: PathBuf,
    entries: RwLock<HashMap<String, HistoryEntry>>,
}

impl History {
    /// Load the history file, or start cold.
    ///
    /// A missing file is the normal first-run case. A file that fails to
    /// parse is logged and treated as empty: everything rebuilds, which
    /// is the same recovery the delete-on-failure policy produces.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = ?path, error = %err, "history file is unreadable; starting cold");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    /// Derive the conventional history file path for a build script: one
    /// file per script identity, named by the string hash of its resolved
    /// path.
    pub fn default_path(dir: &Path, script_identity: &Path) -> PathBuf {
        let tag = hashing::hash_str(&script_identity.to_string_lossy(), FILE_NAME_SEED);
        dir.join(format!("{tag:08x}.history.json"))
    }

    /// Serialize the whole map to disk. Called once, at end-of-run.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = self.read_entries();
        let contents = serde_json::to_string_pretty(&*entries)?;
        fs::write(&self.path, contents)?;

        debug!(path = ?self.path, entries = entries.len(), "history saved");
        Ok(())
    }

    /// Dependency names recorded by the last successful build of `name`.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.read_entries()
            .get(&name.to_lowercase())
            .map(|entry| entry.dependencies.clone())
            .unwrap_or_default()
    }

    /// Decide whether `instance` needs to run, comparing the stored entry
    /// against the current pipeline and files from cheapest check to most
    /// expensive.
    pub fn should_build(&self, instance: &BuildInstance) -> bool {
        let entries = self.read_entries();

        // 1: no history for this output.
        let Some(entry) = entries.get(&instance.name().to_lowercase()) else {
            return true;
        };

        // 2: byproduct set changed (order-insensitive).
        let current: Vec<String> = instance
            .byproduct_names()
            .iter()
            .map(|b| b.to_lowercase())
            .collect();
        let current_set: BTreeSet<&str> = current.iter().map(String::as_str).collect();
        let stored_set: BTreeSet<&str> = entry.byproducts.iter().map(String::as_str).collect();
        if current_set != stored_set {
            return true;
        }

        // 3: pipeline length or stage kinds changed.
        let pipeline = instance.rule().pipeline();
        if entry.stage_kinds != pipeline.stage_kinds() {
            return true;
        }

        // 4: a stage's structural hash changed (processor or tool
        // invocation differs at some position).
        if entry.stage_hashes != pipeline.stage_hashes() {
            return true;
        }

        // 5: input files changed.
        let input_detection = instance.env().input_change_detection;
        if !input_detection.is_none() {
            if entry.input_cache.len() != instance.inputs().len() {
                return true;
            }
            for (path, cached) in instance.inputs().iter().zip(&entry.input_cache) {
                if check_changed(input_detection, path, cached) {
                    return true;
                }
            }
        }

        // 6: output files changed. Byproducts align through the stored
        // name order, not the current declaration order.
        let output_detection = instance.env().output_change_detection;
        if !output_detection.is_none() {
            if entry.output_cache.len() != entry.byproducts.len() + 1 {
                return true;
            }

            let Some(primary) = instance.output_path() else {
                return true;
            };
            if check_changed(output_detection, primary, &entry.output_cache[0]) {
                return true;
            }

            for (name, path) in current.iter().zip(instance.byproduct_paths()) {
                let Some(stored_index) = entry.byproducts.iter().position(|b| b == name) else {
                    return true;
                };
                if check_changed(output_detection, path, &entry.output_cache[stored_index + 1]) {
                    return true;
                }
            }
        }

        // 7: inputs of nested temporary builds changed, recursively.
        if !input_detection.is_none()
            && entry
                .temp_dependencies
                .iter()
                .any(|t| temp_inputs_changed(t, input_detection))
        {
            return true;
        }

        // The whole pipeline is unchanged. The caller still re-starts the
        // recorded dependencies so transitive dependents run their own
        // freshness checks.
        false
    }

    /// Record a successful build, overwriting any prior entry.
    pub fn build_succeeded(&self, instance: &BuildInstance) -> Result<()> {
        let pipeline = instance.rule().pipeline();
        let hash_inputs = instance.env().input_change_detection.content_hash;
        let hash_outputs = instance.env().output_change_detection.content_hash;

        let mut input_cache = Vec::with_capacity(instance.inputs().len());
        for path in instance.inputs() {
            input_cache.push(create_file_entry(path, hash_inputs)?);
        }

        let mut output_cache = Vec::with_capacity(1 + instance.byproduct_paths().len());
        if let Some(primary) = instance.output_path() {
            output_cache.push(create_file_entry(primary, hash_outputs)?);
        }
        for path in instance.byproduct_paths() {
            output_cache.push(create_file_entry(path, hash_outputs)?);
        }

        let entry = HistoryEntry {
            byproducts: instance
                .byproduct_names()
                .iter()
                .map(|b| b.to_lowercase())
                .collect(),
            stage_kinds: pipeline.stage_kinds(),
            stage_hashes: pipeline.stage_hashes(),
            input_cache,
            output_cache,
            dependencies: instance.dependencies().to_vec(),
            temp_dependencies: instance
                .temp_builds()
                .iter()
                .map(|t| create_temp_fingerprint(t, hash_inputs))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut entries = self.write_entries();
        entries.insert(instance.name().to_lowercase(), entry);
        Ok(())
    }

    /// Record a failed build by deleting its entry, forcing an
    /// unconditional rebuild on the next run.
    pub fn build_failed(&self, name: &str) {
        let mut entries = self.write_entries();
        entries.remove(&name.to_lowercase());
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HistoryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HistoryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn temp_inputs_changed(fingerprint: &TempFingerprint, detection: ChangeDetection) -> bool {
    if fingerprint.input_paths.len() != fingerprint.inputs.len() {
        return true;
    }

    for (path, cached) in fingerprint.input_paths.iter().zip(&fingerprint.inputs) {
        if check_changed(detection, path, cached) {
            return true;
        }
    }

    fingerprint
        .temp_dependencies
        .iter()
        .any(|t| temp_inputs_changed(t, detection))
}

fn create_temp_fingerprint(instance: &BuildInstance, hash_inputs: bool) -> Result<TempFingerprint> {
    let mut inputs = Vec::with_capacity(instance.inputs().len());
    for path in instance.inputs() {
        inputs.push(create_file_entry(path, hash_inputs)?);
    }

    Ok(TempFingerprint {
        input_paths: instance.inputs().to_vec(),
        inputs,
        temp_dependencies: instance
            .temp_builds()
            .iter()
            .map(|t| create_temp_fingerprint(t, hash_inputs))
            .collect::<Result<Vec<_>>>()?,
    })
}

fn create_file_entry(path: &Path, should_hash: bool) -> Result<FileEntry> {
    let metadata = fs::metadata(path)?;
    let content_hash = if should_hash {
        Some(hashing::hash_file(path, CONTENT_SEED)?.to_string())
    } else {
        None
    };

    Ok(FileEntry {
        length: metadata.len(),
        modified: metadata.modified()?,
        content_hash,
    })
}

/// Compare a file on disk against its stored snapshot under the given
/// detection bits. A missing file always counts as changed.
fn check_changed(detection: ChangeDetection, path: &Path, entry: &FileEntry) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => return true,
    };

    if detection.length && metadata.len() != entry.length {
        return true;
    }

    if detection.timestamp {
        match metadata.modified() {
            Ok(modified) if modified == entry.modified => {}
            _ => return true,
        }
    }

    if detection.content_hash {
        let current = match hashing::hash_file(path, CONTENT_SEED) {
            Ok(digest) => digest.to_string(),
            Err(_) => return true,
        };
        if entry.content_hash.as_deref() != Some(current.as_str()) {
            return true;
        }
    }

    false
}
