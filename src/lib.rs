// src/lib.rs

//! pipewright: an asset/build pipeline engine with make-like pattern rules
//! and programmable stages.
//!
//! Declarative rules map output-name patterns to chains of transformation
//! stages. Requesting an output resolves the best rule, runs its pipeline
//! against the content roots, and records enough fingerprint data to skip
//! the build entirely next time nothing relevant changed. Concurrent
//! requests for the same output (or one of its byproducts) share a
//! single execution.
//!
//! ```no_run
//! use pipewright::{BuildContext, BuildEnvironment, ContextOptions, History};
//!
//! # async fn demo() -> pipewright::Result<()> {
//! let env = BuildEnvironment::new("content", "dist");
//! let history = History::load(".pipewright/history.json");
//! let ctx = BuildContext::new(env, history, ContextOptions::default())?;
//!
//! // foo.bin is produced by copying foo.txt through the pipeline.
//! ctx.build("*.bin", 0, &[]).from(&["$1.txt"])?;
//!
//! let _build = ctx.start("data.bin");
//! ctx.wait_all().await;
//! let built = ctx.finish()?;
//! # let _ = built;
//! # Ok(())
//! # }
//! ```
//!
//! Command-line parsing, log formatting, file watching and completion
//! notification are the host program's business; this crate exposes the
//! hooks they need ([`BuildContext::probed_paths`],
//! [`BuildContext::finish`], [`BuildContext::should_run_again`]) and
//! nothing more.

pub mod config;
pub mod env;
pub mod errors;
pub mod hashing;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod rules;
pub mod scheduler;

pub use env::{BuildEnvironment, ChangeDetection, DirectoryIndex};
pub use errors::{BuildError, Result};
pub use history::History;
pub use pipeline::{named, Artifact, Processor, RunOptions};
pub use scheduler::{
    BuildContext, BuildFuture, BuildInstance, BuildOutcome, BuildStatus, ContextOptions,
};
