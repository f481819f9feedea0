//! Runtime model of everything currently deployed.
//!
//! Two indexes, one lock: deployment identity and canonical location both
//! map to the same root entry, and both are published atomically so a
//! lookup never observes a half-inserted root.

mod normalizer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::artifact::{ArtifactIdentity, InstallArtifact};
use crate::error::{DeployError, DeployResult};
use crate::graph::{ArtifactGraph, NodeHandle};

pub use normalizer::{LocationNormalizer, StandardNormalizer};

/// What the model remembers about one deployed root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub identity: ArtifactIdentity,
    pub location: Url,
    pub deployed_at: DateTime<Utc>,
}

struct RootEntry {
    node: NodeHandle,
    artifact: Arc<InstallArtifact>,
    record: DeploymentRecord,
}

#[derive(Default)]
struct ModelIndex {
    by_identity: HashMap<ArtifactIdentity, RootEntry>,
    by_location: HashMap<Url, ArtifactIdentity>,
}

/// Concurrent index of deployed roots over a shared [`ArtifactGraph`].
///
/// Every entry is a GC root: deployed directly, not merely reachable as a
/// dependency of some other root. Iteration yields exactly the root set.
pub struct RuntimeArtifactModel {
    graph: Arc<ArtifactGraph>,
    normalizer: Arc<dyn LocationNormalizer>,
    index: Mutex<ModelIndex>,
}

impl RuntimeArtifactModel {
    pub fn new(graph: Arc<ArtifactGraph>, normalizer: Arc<dyn LocationNormalizer>) -> Self {
        Self {
            graph,
            normalizer,
            index: Mutex::new(ModelIndex::default()),
        }
    }

    pub fn graph(&self) -> &Arc<ArtifactGraph> {
        &self.graph
    }

    /// Register the graph node at `location` as a new root.
    ///
    /// The location is normalized before indexing. Re-adding the same node
    /// under its existing identity is a no-op returning the original record;
    /// everything else that collides is an error and leaves the model
    /// unchanged.
    pub fn add(&self, location: &Url, node: NodeHandle) -> DeployResult<DeploymentRecord> {
        let artifact = self.graph.artifact(node).ok_or(DeployError::StaleNode)?;
        let location = self.normalizer.normalize(location);

        let mut index = self.lock();

        if let Some(identity) = index.by_location.get(&location) {
            if identity == artifact.identity() {
                if let Some(entry) = index.by_identity.get(identity)
                    && entry.node == node
                {
                    return Ok(entry.record.clone());
                }
            }
            return Err(DeployError::DuplicateLocation { location });
        }

        if let Some(entry) = index.by_identity.get(artifact.identity()) {
            if entry.node == node {
                return Ok(entry.record.clone());
            }
            return Err(DeployError::DuplicateIdentity {
                identity: artifact.identity().clone(),
            });
        }

        if let Some(file_name) = final_segment(&location)
            && let Some(existing) = index
                .by_location
                .keys()
                .find(|loc| final_segment(loc).as_deref() == Some(file_name.as_str()))
        {
            return Err(DeployError::DuplicateFileName {
                file_name,
                existing: existing.clone(),
            });
        }

        let record = DeploymentRecord {
            identity: artifact.identity().clone(),
            location: location.clone(),
            deployed_at: Utc::now(),
        };
        index
            .by_location
            .insert(location, artifact.identity().clone());
        index.by_identity.insert(
            artifact.identity().clone(),
            RootEntry {
                node,
                artifact,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    pub fn get(&self, identity: &ArtifactIdentity) -> Option<Arc<InstallArtifact>> {
        self.lock()
            .by_identity
            .get(identity)
            .map(|entry| entry.artifact.clone())
    }

    pub fn get_by_location(&self, location: &Url) -> Option<Arc<InstallArtifact>> {
        let location = self.normalizer.normalize(location);
        let index = self.lock();
        let identity = index.by_location.get(&location)?;
        index
            .by_identity
            .get(identity)
            .map(|entry| entry.artifact.clone())
    }

    pub fn location_of(&self, identity: &ArtifactIdentity) -> Option<Url> {
        self.lock()
            .by_identity
            .get(identity)
            .map(|entry| entry.record.location.clone())
    }

    pub fn record(&self, identity: &ArtifactIdentity) -> Option<DeploymentRecord> {
        self.lock()
            .by_identity
            .get(identity)
            .map(|entry| entry.record.clone())
    }

    /// True iff `identity` is registered as a root, not merely reachable as
    /// someone's dependency.
    pub fn is_gc_root(&self, identity: &ArtifactIdentity) -> bool {
        self.lock().by_identity.contains_key(identity)
    }

    /// True iff this exact graph node is a registered root. Distinguishes a
    /// freshly-built node from an older root that shares its identity.
    pub fn node_is_root(&self, node: NodeHandle) -> bool {
        self.lock()
            .by_identity
            .values()
            .any(|entry| entry.node == node)
    }

    /// Snapshot of exactly the current roots. Later mutation of the model
    /// does not affect an iteration already under way.
    pub fn roots(&self) -> Vec<Arc<InstallArtifact>> {
        self.lock()
            .by_identity
            .values()
            .map(|entry| entry.artifact.clone())
            .collect()
    }

    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.lock()
            .by_identity
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_identity.is_empty()
    }

    /// Remove the root and, transitively, every descendant not reachable
    /// from any other root.
    ///
    /// The index entries go first, atomically; teardown of the swept
    /// artifacts is best-effort afterwards. Backing storage already missing
    /// from disk does not fail the deletion: the model is authoritative for
    /// what is deployed.
    pub fn delete(&self, identity: &ArtifactIdentity) -> DeployResult<()> {
        let entry = {
            let mut index = self.lock();
            let entry = index
                .by_identity
                .remove(identity)
                .ok_or_else(|| DeployError::NotFound {
                    identity: identity.clone(),
                })?;
            index.by_location.remove(&entry.record.location);
            entry
        };

        let swept = self.graph.sweep(entry.node);
        debug!(root = %identity, swept = swept.len(), "deleted deployment root");
        for artifact in swept {
            if let Err(err) = artifact.uninstall() {
                warn!(artifact = %artifact.identity(), error = %err,
                    "uninstall during delete failed; entry already removed from model");
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ModelIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn final_segment(location: &Url) -> Option<String> {
    location
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
}
