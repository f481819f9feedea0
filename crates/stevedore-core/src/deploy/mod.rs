//! Deployment orchestration: the fixed-shape install/refresh/uninstall
//! workflows over the pipeline, graph, and runtime model.

mod providers;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use url::Url;

use crate::artifact::{AbortSignal, ArtifactIdentity, InstallArtifact, RefreshOutcome, StartOutcome};
use crate::error::{DeployError, DeployResult};
use crate::events::{FailureKind, FailureSink};
use crate::graph::ArtifactGraph;
use crate::model::{LocationNormalizer, RuntimeArtifactModel};
use crate::monitor::{OperationKind, ProgressTracker};
use crate::pipeline::{
    CommitStage, CompensatingPipeline, FnStage, InstallEnvironment, PipelineStage, UninstallStage,
    VisitStage,
};
use crate::storage::IdentityDeterminer;

pub use providers::{
    ArtifactBuilder, DirStoreProvider, InertLifecycleProvider, LifecycleProvider, StoreProvider,
};

/// Per-request deployment options.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Scope hint handed to identity determination.
    pub scope: Option<String>,
    /// Whether the install pipeline drives the artifact to `Active`.
    pub start_after_install: bool,
    /// Abort flag an external watchdog can raise; observed by start stages
    /// at artifact granularity.
    pub abort: AbortSignal,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            scope: None,
            start_after_install: true,
            abort: AbortSignal::new(),
        }
    }
}

/// Front door of the kernel: builds the artifact graph for a unit and runs
/// the compensating pipeline appropriate to the operation.
///
/// Each call runs synchronously on the calling thread end-to-end; invoking
/// the deployer from several threads deploys independently, with the
/// runtime model's own locking as the only synchronization point.
pub struct Deployer {
    graph: Arc<ArtifactGraph>,
    model: Arc<RuntimeArtifactModel>,
    builder: Arc<ArtifactBuilder>,
    sink: Arc<dyn FailureSink>,
    tracker: Arc<ProgressTracker>,
    resolve_stages: Vec<Arc<dyn PipelineStage>>,
}

impl Deployer {
    pub fn new(
        stores: Arc<dyn StoreProvider>,
        identities: Arc<dyn IdentityDeterminer>,
        lifecycles: Arc<dyn LifecycleProvider>,
        normalizer: Arc<dyn LocationNormalizer>,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        let graph = Arc::new(ArtifactGraph::new());
        let model = Arc::new(RuntimeArtifactModel::new(graph.clone(), normalizer));
        let builder = Arc::new(ArtifactBuilder::new(
            graph.clone(),
            stores,
            identities,
            lifecycles,
        ));
        Self {
            graph,
            model,
            builder,
            sink,
            tracker: Arc::new(ProgressTracker::new()),
            resolve_stages: Vec::new(),
        }
    }

    /// Insert a stage ahead of installation, e.g. a dependency resolver
    /// that attaches child artifacts via the [`ArtifactBuilder`].
    #[must_use]
    pub fn with_resolve_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.resolve_stages.push(stage);
        self
    }

    pub fn graph(&self) -> &Arc<ArtifactGraph> {
        &self.graph
    }

    pub fn model(&self) -> &Arc<RuntimeArtifactModel> {
        &self.model
    }

    pub fn artifact_builder(&self) -> &Arc<ArtifactBuilder> {
        &self.builder
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Install the unit at `source` and register it as a root.
    ///
    /// Any stage failure triggers the uninstall compensation, leaving the
    /// runtime model exactly as it was before the call, and re-raises the
    /// original error already diagnosed.
    pub fn install(
        &self,
        source: &Path,
        options: DeployOptions,
    ) -> DeployResult<Arc<InstallArtifact>> {
        let _op = self
            .tracker
            .begin(OperationKind::Install, source.display().to_string());

        let location = file_location(source)?;
        let (artifact, node) = self.builder.build(source, options.scope.as_deref())?;
        debug!(artifact = %artifact.identity(), location = %location, "installing");

        let env = InstallEnvironment::new(
            self.graph.clone(),
            self.model.clone(),
            self.sink.clone(),
            FailureKind::Install,
            location,
            options,
        );

        let pipeline = self.install_pipeline();
        pipeline.process(node, &env)?;

        info!(artifact = %artifact.identity(), "installed");
        Ok(artifact)
    }

    /// Re-read the backing storage of a deployed root.
    ///
    /// A refresh that would change the artifact's identity is rejected and
    /// the staged content rolled back; replacing an artifact is an
    /// uninstall/install, not a refresh.
    pub fn refresh(&self, identity: &ArtifactIdentity) -> DeployResult<RefreshOutcome> {
        let artifact = self
            .model
            .get(identity)
            .ok_or_else(|| DeployError::NotFound {
                identity: identity.clone(),
            })?;
        let _op = self
            .tracker
            .begin(OperationKind::Refresh, identity.to_string());

        match self.try_refresh(&artifact, identity) {
            Ok(outcome) => {
                debug!(artifact = %identity, ?outcome, "refresh finished");
                Ok(outcome)
            }
            Err(err) => {
                let err = if err.is_diagnosed() {
                    err
                } else {
                    self.sink.failure(FailureKind::Refresh, Some(&err));
                    err.into_diagnosed()
                };
                Err(err)
            }
        }
    }

    fn try_refresh(
        &self,
        artifact: &InstallArtifact,
        identity: &ArtifactIdentity,
    ) -> DeployResult<RefreshOutcome> {
        let outcome = artifact.refresh()?;
        if outcome == RefreshOutcome::Refreshed {
            let fresh = self
                .builder
                .determine_identity(artifact.store(), identity.scope.as_deref())?;
            if &fresh != identity {
                if let Err(err) = artifact.store().roll_back() {
                    warn!(artifact = %identity, error = format!("{err:#}"),
                        "roll back after identity drift failed");
                }
                return Err(DeployError::failure(format!(
                    "refresh of {identity} would change its identity to {fresh}"
                )));
            }
        }
        Ok(outcome)
    }

    /// Remove a deployed root and everything only it keeps alive.
    ///
    /// Teardown is best-effort: a misbehaving stop cannot block removal of
    /// the model entry.
    pub fn uninstall(&self, identity: &ArtifactIdentity) -> DeployResult<()> {
        let _op = self
            .tracker
            .begin(OperationKind::Uninstall, identity.to_string());
        self.model.delete(identity)?;
        info!(artifact = %identity, "uninstalled");
        Ok(())
    }

    /// Resolve first (dependency discovery grows the subtree), then install
    /// and start everything discovered, and only then publish the root.
    /// Commit is last so a failure anywhere leaves the model untouched.
    fn install_pipeline(&self) -> CompensatingPipeline {
        let pipeline = CompensatingPipeline::new("install", Arc::new(UninstallStage));
        for stage in &self.resolve_stages {
            pipeline.append_stage(stage.clone());
        }
        pipeline
            .with_stage(VisitStage::new(
                "install-artifacts",
                |artifact: &InstallArtifact, _env: &InstallEnvironment| artifact.install(),
            ))
            .with_stage(FnStage::new("start-artifacts", start_subtree))
            .with_stage(CommitStage)
    }
}

/// Start every artifact under `node`, children before parents, honouring
/// the environment's abort signal. An observed abort fails the install so
/// the compensation stage unwinds it.
fn start_subtree(
    node: crate::graph::NodeHandle,
    env: &InstallEnvironment,
) -> DeployResult<()> {
    if !env.options().start_after_install {
        return Ok(());
    }
    let graph = env.graph();
    let mut order = vec![node];
    order.extend(graph.descendants(node));
    for handle in order.into_iter().rev() {
        if let Some(artifact) = graph.artifact(handle) {
            match artifact.start(env.abort())? {
                StartOutcome::Started => {}
                StartOutcome::Aborted => {
                    return Err(DeployError::failure(format!(
                        "start of {} aborted",
                        artifact.identity()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn file_location(source: &Path) -> DeployResult<Url> {
    let canonical = std::fs::canonicalize(source)
        .with_context(|| format!("Failed to resolve deployment location: {}", source.display()))?;
    Url::from_file_path(&canonical).map_err(|()| {
        DeployError::failure(format!(
            "not an absolute deployment location: {}",
            canonical.display()
        ))
    })
}
