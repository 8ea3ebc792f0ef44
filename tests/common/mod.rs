// tests/common/mod.rs

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

use pipewright::{
    Artifact, BuildContext, BuildEnvironment, BuildInstance, ContextOptions, History,
};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Uses `with_test_writer()`, so logs are captured per-test and printed
/// only for failing tests (unless you run with `-- --nocapture`).
/// Enable levels with e.g. `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Disposable input/output/history roots for one test.
pub struct TestDirs {
    pub root: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub history_file: PathBuf,
}

pub fn test_dirs() -> TestDirs {
    init_tracing();

    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let output = root.path().join("out");
    fs::create_dir_all(&input).unwrap();
    fs::create_dir_all(&output).unwrap();
    let history_file = root.path().join("cache").join("history.json");

    TestDirs {
        root,
        input,
        output,
        history_file,
    }
}

impl TestDirs {
    /// A fresh context over these roots, sharing the history file with any
    /// context created before it: "one context per run" in the tests.
    pub fn context(&self) -> BuildContext {
        self.context_with(ContextOptions::default())
    }

    pub fn context_with(&self, options: ContextOptions) -> BuildContext {
        self.context_from_env(self.env(), options)
    }

    pub fn context_from_env(&self, env: BuildEnvironment, options: ContextOptions) -> BuildContext {
        let history = History::load(&self.history_file);
        BuildContext::new(env, history, options).unwrap()
    }

    pub fn env(&self) -> BuildEnvironment {
        BuildEnvironment::new(&self.input, &self.output)
    }

    pub fn write_input(&self, name: &str, contents: &str) {
        fs::write(self.input.join(name), contents).unwrap();
    }

    pub fn read_output(&self, name: &str) -> String {
        fs::read_to_string(self.output.join(name)).unwrap()
    }

    pub fn output_exists(&self, name: &str) -> bool {
        self.output.join(name).exists()
    }
}

/// A processor that upper-cases every input artifact.
pub fn uppercase(
    _instance: &mut BuildInstance,
    inputs: Vec<Artifact>,
) -> anyhow::Result<Vec<Artifact>> {
    inputs
        .into_iter()
        .map(|artifact| Ok(Artifact::from_bytes(artifact.read()?.to_ascii_uppercase())))
        .collect()
}
