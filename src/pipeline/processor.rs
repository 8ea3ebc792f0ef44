// src/pipeline/processor.rs

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::errors::{BuildError, Result};
use crate::hashing;
use crate::pipeline::Artifact;
use crate::rules::DeclSite;
use crate::scheduler::BuildInstance;

/// Seed for hashing processor identities into structural hashes.
const IDENTITY_SEED: u32 = 0x5057_0001;

/// A user-supplied transform between pipeline stages.
///
/// Implemented for free by any matching closure. `identity` feeds the
/// pipeline's structural hash: give a processor a stable identity (see
/// [`named`]) when a change to its behavior should invalidate previously
/// built outputs; anonymous processors hash by position and kind alone.
pub trait Processor: Send + Sync + 'static {
    fn identity(&self) -> Option<&str> {
        None
    }

    fn process(
        &self,
        instance: &mut BuildInstance,
        inputs: Vec<Artifact>,
    ) -> anyhow::Result<Vec<Artifact>>;
}

impl<F> Processor for F
where
    F: Fn(&mut BuildInstance, Vec<Artifact>) -> anyhow::Result<Vec<Artifact>>
        + Send
        + Sync
        + 'static,
{
    fn process(
        &self,
        instance: &mut BuildInstance,
        inputs: Vec<Artifact>,
    ) -> anyhow::Result<Vec<Artifact>> {
        self(instance, inputs)
    }
}

/// Attach a stable identity to a processor, typically a name plus a
/// version: `named("minify/2", |instance, inputs| ...)`.
pub fn named<P: Processor>(identity: impl Into<String>, inner: P) -> impl Processor {
    struct Named<P> {
        identity: String,
        inner: P,
    }

    impl<P: Processor> Processor for Named<P> {
        fn identity(&self) -> Option<&str> {
            Some(&self.identity)
        }

        fn process(
            &self,
            instance: &mut BuildInstance,
            inputs: Vec<Artifact>,
        ) -> anyhow::Result<Vec<Artifact>> {
            self.inner.process(instance, inputs)
        }
    }

    Named {
        identity: identity.into(),
        inner,
    }
}

/// A pipeline stage wrapping a [`Processor`].
pub struct ProcessorStage {
    processor: Box<dyn Processor>,
    decl_site: DeclSite,
}

impl ProcessorStage {
    pub(crate) fn new(processor: impl Processor, decl_site: DeclSite) -> Self {
        Self {
            processor: Box::new(processor),
            decl_site,
        }
    }

    pub fn decl_site(&self) -> DeclSite {
        self.decl_site
    }

    pub fn structural_hash(&self) -> String {
        match self.processor.identity() {
            Some(identity) => {
                format!("processor/{:08x}", hashing::hash_str(identity, IDENTITY_SEED))
            }
            None => "processor".to_string(),
        }
    }

    /// Invoke the callback. Errors and panics are both converted into a
    /// stage failure carrying the asset name; nothing a processor does can
    /// take down the scheduler or sibling builds.
    pub(crate) fn evaluate(
        &self,
        instance: &mut BuildInstance,
        inputs: Vec<Artifact>,
    ) -> Result<Vec<Artifact>> {
        let asset = instance.name().to_string();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.processor.process(instance, inputs)
        }));

        match outcome {
            Ok(Ok(outputs)) => Ok(outputs),
            Ok(Err(err)) => Err(BuildError::Processor {
                asset,
                message: format!("{err:#} ({})", self.decl_site),
            }),
            Err(panic) => Err(BuildError::Processor {
                asset,
                message: format!("panicked: {} ({})", panic_message(&panic), self.decl_site),
            }),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
