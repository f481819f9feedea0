//! Stock pipeline stages.

use tracing::warn;

use super::{InstallEnvironment, PipelineStage};
use crate::artifact::InstallArtifact;
use crate::error::DeployResult;
use crate::graph::NodeHandle;

/// Closure-backed stage for wiring and tests.
pub struct FnStage<F>
where
    F: Fn(NodeHandle, &InstallEnvironment) -> DeployResult<()> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(NodeHandle, &InstallEnvironment) -> DeployResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> PipelineStage for FnStage<F>
where
    F: Fn(NodeHandle, &InstallEnvironment) -> DeployResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        (self.func)(node, env)
    }
}

/// Applies an operation to one artifact at a time.
pub trait ArtifactVisitor: Send + Sync {
    fn visit(&self, artifact: &InstallArtifact, env: &InstallEnvironment) -> DeployResult<()>;
}

impl<F> ArtifactVisitor for F
where
    F: Fn(&InstallArtifact, &InstallEnvironment) -> DeployResult<()> + Send + Sync,
{
    fn visit(&self, artifact: &InstallArtifact, env: &InstallEnvironment) -> DeployResult<()> {
        self(artifact, env)
    }
}

/// Stage that applies a visitor to the target node and every artifact
/// below it, in breadth-first order.
pub struct VisitStage<V: ArtifactVisitor> {
    name: String,
    visitor: V,
}

impl<V: ArtifactVisitor> VisitStage<V> {
    pub fn new(name: impl Into<String>, visitor: V) -> Self {
        Self {
            name: name.into(),
            visitor,
        }
    }
}

impl<V: ArtifactVisitor> PipelineStage for VisitStage<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        let graph = env.graph();
        let mut order = vec![node];
        order.extend(graph.descendants(node));
        for handle in order {
            if let Some(artifact) = graph.artifact(handle) {
                self.visitor.visit(&artifact, env)?;
            }
        }
        Ok(())
    }
}

/// Publishes the install graph's root into the runtime model. The success
/// end of an install pipeline; anything failing before this stage leaves
/// the model untouched.
#[derive(Debug, Default)]
pub struct CommitStage;

impl PipelineStage for CommitStage {
    fn name(&self) -> &str {
        "commit"
    }

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        env.model().add(env.location(), node).map(|_| ())
    }
}

/// The canonical compensation: tears down a partially-installed subtree
/// and removes any trace of it from the runtime model.
#[derive(Debug, Default)]
pub struct UninstallStage;

impl PipelineStage for UninstallStage {
    fn name(&self) -> &str {
        "uninstall"
    }

    fn process(&self, node: NodeHandle, env: &InstallEnvironment) -> DeployResult<()> {
        let graph = env.graph();
        let Some(artifact) = graph.artifact(node) else {
            return Ok(());
        };

        if env.model().node_is_root(node) {
            // The commit stage got that far; deleting the root unwinds the
            // model entry and sweeps the subtree in one step.
            if let Err(err) = env.model().delete(artifact.identity()) {
                warn!(artifact = %artifact.identity(), error = %err,
                    "could not remove partially-installed root from model");
            }
            return Ok(());
        }

        for artifact in graph.sweep(node) {
            if let Err(err) = artifact.uninstall() {
                warn!(artifact = %artifact.identity(), error = %err,
                    "teardown of partial install failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_stage_reports_its_name() {
        let stage = FnStage::new("noop", |_, _| Ok(()));
        assert_eq!(stage.name(), "noop");
    }
}
