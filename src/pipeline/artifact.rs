// src/pipeline/artifact.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::errors::Result;

/// A value flowing between pipeline stages.
///
/// Inputs enter the pipeline as on-disk files referenced by path;
/// processors may replace them with in-memory buffers. The sink copies
/// files directly and streams buffers, so a pipeline that never transforms
/// its bytes never reads them through this process either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A file on disk, referenced by path.
    File(PathBuf),
    /// Bytes produced in memory by a processor stage.
    Memory(Vec<u8>),
}

impl Artifact {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Artifact::Memory(bytes.into())
    }

    /// The backing path, when the artifact is an on-disk file.
    pub fn as_file(&self) -> Option<&Path> {
        match self {
            Artifact::File(path) => Some(path),
            Artifact::Memory(_) => None,
        }
    }

    /// Read the artifact's contents into memory.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Artifact::File(path) => {
                Ok(fs::read(path).with_context(|| format!("reading artifact {path:?}"))?)
            }
            Artifact::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    /// Write the artifact to `dest`. On-disk files are copied without
    /// round-tripping their bytes through this process.
    pub fn write_to(&self, dest: &Path) -> Result<()> {
        match self {
            Artifact::File(source) => {
                fs::copy(source, dest)
                    .with_context(|| format!("copying {source:?} to {dest:?}"))?;
            }
            Artifact::Memory(bytes) => {
                fs::write(dest, bytes).with_context(|| format!("writing {dest:?}"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_artifacts_write_their_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        Artifact::from_bytes(&b"payload"[..]).write_to(&dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn file_artifacts_copy_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dst.bin");
        fs::write(&src, b"contents").unwrap();

        let artifact = Artifact::File(src.clone());
        assert_eq!(artifact.read().unwrap(), b"contents");
        artifact.write_to(&dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"contents");
        assert_eq!(artifact.as_file(), Some(src.as_path()));
    }
}
