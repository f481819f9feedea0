//! Injected seams the deployer uses to turn a source location into an
//! install artifact, and the builder that wires them together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::artifact::{ArtifactIdentity, ArtifactLifecycle, InertLifecycle, InstallArtifact};
use crate::config::KernelConfig;
use crate::error::DeployResult;
use crate::graph::{ArtifactGraph, NodeHandle};
use crate::storage::{ArtifactStore, DirArtifactStore, IdentityDeterminer};

/// Creates the backing store for a unit discovered at a source path.
pub trait StoreProvider: Send + Sync {
    fn store_for(&self, source: &Path) -> anyhow::Result<Arc<dyn ArtifactStore>>;
}

/// Default provider: a fresh [`DirArtifactStore`] work area per store,
/// keyed by the source's file name, a short digest of its full path, and an
/// instance counter. Distinct stores never share a staging directory, so a
/// failed re-install can never delete the staged tree of a live deployment.
pub struct DirStoreProvider {
    work_dir: PathBuf,
    next: AtomicU64,
}

impl DirStoreProvider {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(&config.work_dir)
    }
}

impl StoreProvider for DirStoreProvider {
    fn store_for(&self, source: &Path) -> anyhow::Result<Arc<dyn ArtifactStore>> {
        let digest = blake3::hash(source.to_string_lossy().as_bytes()).to_hex();
        let short = &digest[..12];
        let instance = self.next.fetch_add(1, Ordering::Relaxed);
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let work = self.work_dir.join(format!("{name}-{short}-{instance}"));
        Ok(Arc::new(DirArtifactStore::new(source, work)?))
    }
}

/// Chooses the per-type lifecycle adapter for a named artifact.
pub trait LifecycleProvider: Send + Sync {
    fn lifecycle_for(&self, identity: &ArtifactIdentity) -> Box<dyn ArtifactLifecycle>;
}

/// Provider that treats every artifact as inert. Suitable for
/// configuration-only deployments and tests.
#[derive(Debug, Default)]
pub struct InertLifecycleProvider;

impl LifecycleProvider for InertLifecycleProvider {
    fn lifecycle_for(&self, _identity: &ArtifactIdentity) -> Box<dyn ArtifactLifecycle> {
        Box::new(InertLifecycle)
    }
}

/// Builds install artifacts from a source location using the injected
/// storage, identity, and lifecycle seams, and links them into the graph.
///
/// Resolve stages hold one of these to create child artifacts as
/// dependencies are discovered during install planning.
pub struct ArtifactBuilder {
    graph: Arc<ArtifactGraph>,
    stores: Arc<dyn StoreProvider>,
    identities: Arc<dyn IdentityDeterminer>,
    lifecycles: Arc<dyn LifecycleProvider>,
}

impl ArtifactBuilder {
    pub fn new(
        graph: Arc<ArtifactGraph>,
        stores: Arc<dyn StoreProvider>,
        identities: Arc<dyn IdentityDeterminer>,
        lifecycles: Arc<dyn LifecycleProvider>,
    ) -> Self {
        Self {
            graph,
            stores,
            identities,
            lifecycles,
        }
    }

    /// Build a detached artifact node for the unit at `source`.
    ///
    /// The store is synchronized once up front so identity determination
    /// sees the staged bytes.
    pub fn build(
        &self,
        source: &Path,
        scope: Option<&str>,
    ) -> DeployResult<(Arc<InstallArtifact>, NodeHandle)> {
        let store = self.stores.store_for(source)?;
        store.synchronize()?;
        let identity = self.identities.determine(store.as_ref(), scope)?;
        let lifecycle = self.lifecycles.lifecycle_for(&identity);
        let artifact = Arc::new(InstallArtifact::new(identity, store, lifecycle));
        let node = self.graph.insert(artifact.clone());
        Ok((artifact, node))
    }

    /// Re-derive the identity of an already-staged artifact, e.g. after a
    /// refresh re-read its backing storage.
    pub fn determine_identity(
        &self,
        store: &dyn ArtifactStore,
        scope: Option<&str>,
    ) -> DeployResult<ArtifactIdentity> {
        Ok(self.identities.determine(store, scope)?)
    }

    /// Build an artifact for a resolved dependency and link it under
    /// `parent`. Fails with a cyclic-dependency error instead of ever
    /// producing a cycle.
    pub fn build_child(
        &self,
        parent: NodeHandle,
        source: &Path,
        scope: Option<&str>,
    ) -> DeployResult<(Arc<InstallArtifact>, NodeHandle)> {
        let (artifact, node) = self.build(source, scope)?;
        self.graph.add_child(parent, node)?;
        Ok((artifact, node))
    }
}
