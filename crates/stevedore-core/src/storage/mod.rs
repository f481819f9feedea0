//! Backing storage for artifact bytes.
//!
//! The kernel never interprets artifact content; it only stages, hashes,
//! rolls back, and deletes it through the [`ArtifactStore`] seam. Format
//! logic (manifests, bundle metadata) lives behind [`IdentityDeterminer`]
//! and the artifact lifecycle adapters.

mod dir_store;
mod tree_hash;

use std::path::Path;

use crate::artifact::ArtifactIdentity;

pub use dir_store::DirArtifactStore;
pub use tree_hash::tree_digest;

/// Storage handle for one artifact's staged bytes.
pub trait ArtifactStore: Send + Sync {
    /// Root of the artifact's staged filesystem tree.
    fn artifact_fs(&self) -> &Path;

    /// Re-stage from the source, keeping the previous generation so a
    /// failed operation can roll back.
    fn synchronize(&self) -> anyhow::Result<()>;

    /// Restore the generation that the last `synchronize` replaced.
    fn roll_back(&self) -> anyhow::Result<()>;

    /// Drop all staged generations.
    fn delete(&self) -> anyhow::Result<()>;

    /// Deterministic content hash of the staged tree.
    fn content_hash(&self) -> anyhow::Result<String>;
}

/// Names a freshly-discovered artifact from its staged bytes.
pub trait IdentityDeterminer: Send + Sync {
    fn determine(
        &self,
        store: &dyn ArtifactStore,
        scope: Option<&str>,
    ) -> anyhow::Result<ArtifactIdentity>;
}
