//! Ordered, compensating deployment pipelines.
//!
//! A pipeline is an ordered sequence of stages run synchronously on the
//! calling thread against one node of the install graph. Pipelines are
//! themselves stages, so they nest; wrapping a pipeline in a
//! [`CompensatingPipeline`] attaches the single undo stage that runs when
//! any contained stage fails.

mod compensating;
mod stages;

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use url::Url;

use crate::artifact::AbortSignal;
use crate::deploy::DeployOptions;
use crate::error::DeployResult;
use crate::events::{FailureKind, FailureSink};
use crate::graph::{ArtifactGraph, NodeHandle};
use crate::model::RuntimeArtifactModel;

pub use compensating::CompensatingPipeline;
pub use stages::{ArtifactVisitor, CommitStage, FnStage, UninstallStage, VisitStage};

/// What a stage sees while processing one node of the install graph.
pub struct InstallEnvironment {
    graph: Arc<ArtifactGraph>,
    model: Arc<RuntimeArtifactModel>,
    sink: Arc<dyn FailureSink>,
    kind: FailureKind,
    location: Url,
    options: DeployOptions,
}

impl InstallEnvironment {
    pub fn new(
        graph: Arc<ArtifactGraph>,
        model: Arc<RuntimeArtifactModel>,
        sink: Arc<dyn FailureSink>,
        kind: FailureKind,
        location: Url,
        options: DeployOptions,
    ) -> Self {
        Self {
            graph,
            model,
            sink,
            kind,
            location,
            options,
        }
    }

    pub fn graph(&self) -> &ArtifactGraph {
        &self.graph
    }

    pub fn model(&self) -> &RuntimeArtifactModel {
        &self.model
    }

    /// Canonical location of the unit this environment serves.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    /// Abort flag observed by start stages; shared with the caller that
    /// built the [`DeployOptions`].
    pub fn abort(&self) -> &AbortSignal {
        &self.options.abort
    }

    pub(crate) fn report_failure(&self, error: &crate::error::DeployError) {
        self.sink.failure(self.kind, Some(error));
    }
}

/// One unit of deployment work.
///
/// Success is the absence of an error; stages log nothing on failure
/// themselves, leaving diagnosis to the compensating pipeline so the same
/// root cause is never reported twice.
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()>;
}

/// Ordered sequence of stages executed against a graph node.
pub struct Pipeline {
    name: String,
    stages: Mutex<Vec<Arc<dyn PipelineStage>>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Mutex::new(Vec::new()),
        }
    }

    /// Builder-style append.
    #[must_use]
    pub fn with_stage(self, stage: impl PipelineStage + 'static) -> Self {
        self.append_stage(Arc::new(stage));
        self
    }

    /// Append a stage; safe to call from several configuring threads.
    pub fn append_stage(&self, stage: Arc<dyn PipelineStage>) {
        self.lock().push(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn PipelineStage>>> {
        self.stages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PipelineStage for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    /// Run every stage in append order on the calling thread.
    ///
    /// The stage list is snapshotted under the lock; execution itself is
    /// not serialized against other pipeline invocations. The first stage
    /// to fail aborts the remainder of this invocation.
    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        let stages: Vec<Arc<dyn PipelineStage>> = self.lock().clone();
        for stage in stages {
            debug!(pipeline = %self.name, stage = %stage.name(), "running stage");
            stage.process(node, env)?;
        }
        Ok(())
    }
}
