// src/env/dir_index.rs

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, error};
use walkdir::WalkDir;

use crate::errors::Result;

/// Case-insensitive flattened index of every file under a root.
///
/// Built once up front so that "find this file name anywhere under the
/// content tree" lookups don't walk the filesystem per asset. Pair it with
/// [`crate::env::resolvers::flatten`] to let rules name inputs without
/// their directory.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    /// Lower-cased file name -> relative paths carrying that name.
    files: HashMap<String, Vec<String>>,
}

impl DirectoryIndex {
    /// Walk `root` and index every file by its lower-cased name.
    pub fn build(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut files: HashMap<String, Vec<String>> = HashMap::new();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| std::io::Error::other(e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let key = entry.file_name().to_string_lossy().to_lowercase();
            files.entry(key).or_default().push(relative);
        }

        debug!(root = ?root, indexed = files.len(), "directory index built");
        Ok(Self { files })
    }

    /// Look a file name up. Exactly one match returns its relative path;
    /// an ambiguous name logs an error and resolves to nothing, as does a
    /// name that is not indexed at all.
    pub fn get_path(&self, name: &str) -> Option<String> {
        let candidates = self.files.get(&name.to_lowercase())?;
        if candidates.len() > 1 {
            error!(
                name = %name,
                candidates = ?candidates,
                "more than one file matches name in flatten resolve"
            );
            return None;
        }
        candidates.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_files_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("deep/nested")).unwrap();
        fs::write(dir.path().join("deep/nested/Texture.png"), b"x").unwrap();

        let index = DirectoryIndex::build(dir.path()).unwrap();
        let path = index.get_path("texture.PNG").unwrap();
        assert_eq!(Path::new(&path), Path::new("deep/nested/Texture.png"));
    }

    #[test]
    fn ambiguous_names_resolve_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/same.txt"), b"1").unwrap();
        fs::write(dir.path().join("b/same.txt"), b"2").unwrap();

        let index = DirectoryIndex::build(dir.path()).unwrap();
        assert!(index.get_path("same.txt").is_none());
        assert!(index.get_path("missing.txt").is_none());
    }
}
