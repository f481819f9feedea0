//! Pipeline decorator with a single compensation stage.

use std::sync::Arc;

use tracing::warn;

use super::{InstallEnvironment, Pipeline, PipelineStage};
use crate::error::DeployResult;
use crate::graph::NodeHandle;

/// A [`Pipeline`] that runs one designated compensation stage when any
/// contained stage fails, then re-raises the original failure.
///
/// Compensation never swallows the failure; it only cleans up side effects,
/// so a half-applied artifact is never left registered as live. A secondary
/// failure inside the compensation stage is logged as a warning and never
/// masks the original error.
pub struct CompensatingPipeline {
    delegate: Pipeline,
    compensation: Arc<dyn PipelineStage>,
}

impl CompensatingPipeline {
    pub fn new(name: impl Into<String>, compensation: Arc<dyn PipelineStage>) -> Self {
        Self {
            delegate: Pipeline::new(name),
            compensation,
        }
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.delegate = self.delegate.with_stage(stage);
        self
    }

    pub fn append_stage(&self, stage: Arc<dyn PipelineStage>) {
        self.delegate.append_stage(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.delegate.stage_count()
    }
}

impl PipelineStage for CompensatingPipeline {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        let err = match self.delegate.process(node, env) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        // Single diagnosis point: report once, then mark so outer layers
        // stay quiet about the same root cause.
        let err = if err.is_diagnosed() {
            err
        } else {
            env.report_failure(&err);
            err.into_diagnosed()
        };

        if let Err(comp_err) = self.compensation.process(node, env) {
            warn!(
                pipeline = %self.delegate.name(),
                compensation = %self.compensation.name(),
                error = %comp_err,
                "compensation failed; original failure still propagates"
            );
        }

        Err(err)
    }
}
