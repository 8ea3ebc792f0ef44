// src/errors.rs

//! Crate-wide error types and helpers.

use thiserror::Error;

use crate::rules::DeclSite;

/// Everything that can go wrong while matching, resolving or running a
/// build pipeline.
///
/// Rule ambiguity is deliberately absent: two rules matching at the same
/// priority is a logged warning with a deterministic pick, not an error.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no applicable rule found for asset '{0}'")]
    NoMatchingRule(String),

    #[error("could not resolve input '{name}' ({site})")]
    UnresolvedInput { name: String, site: DeclSite },

    #[error("could not resolve output '{name}' ({site})")]
    UnresolvedOutput { name: String, site: DeclSite },

    #[error(
        "number of pipeline results ({produced}) does not match number of outputs ({expected}) for '{asset}' ({site})"
    )]
    ArityMismatch {
        asset: String,
        produced: usize,
        expected: usize,
        site: DeclSite,
    },

    #[error("could not find external program '{program}' ({site})")]
    ExternalToolNotFound { program: String, site: DeclSite },

    #[error("external program '{program}' exited with code {code} ({site})")]
    ExternalToolFailed {
        program: String,
        code: i32,
        site: DeclSite,
    },

    #[error("processor failed for '{asset}': {message}")]
    Processor { asset: String, message: String },

    #[error("temporary build of '{name}' requested by '{requester}' is already in progress higher up the chain")]
    CircularDependency { name: String, requester: String },

    #[error("a nested temporary build failed underneath '{0}'")]
    TemporaryBuildFailed(String),

    #[error("invalid rule pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("build worker for '{0}' terminated abnormally")]
    WorkerPanic(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("history serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BuildError>;
