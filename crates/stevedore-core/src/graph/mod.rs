//! Concurrent DAG of install artifacts.
//!
//! Nodes live in a petgraph arena addressed by opaque handles; a node may
//! have several parents (shared sub-dependency), which is why liveness is
//! decided by reachability rather than reference counting. Structure is
//! guarded by one read/write lock per graph, and traversals operate on
//! snapshots taken under a short read section, so no lock is held while
//! callers inspect the results.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;

use crate::artifact::InstallArtifact;
use crate::error::{DeployError, DeployResult};

/// Opaque handle to a node in an [`ArtifactGraph`].
pub type NodeHandle = NodeIndex;

type Inner = StableDiGraph<Arc<InstallArtifact>, ()>;

/// Shared dependency graph of everything the kernel currently knows about.
#[derive(Default)]
pub struct ArtifactGraph {
    inner: RwLock<Inner>,
}

impl ArtifactGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached node for a freshly discovered artifact and link the
    /// artifact back to its handle.
    pub fn insert(&self, artifact: Arc<InstallArtifact>) -> NodeHandle {
        let node = self.write().add_node(artifact.clone());
        artifact.set_node(node);
        node
    }

    pub fn artifact(&self, node: NodeHandle) -> Option<Arc<InstallArtifact>> {
        self.read().node_weight(node).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.read().node_count()
    }

    pub fn contains(&self, node: NodeHandle) -> bool {
        self.read().contains_node(node)
    }

    /// Append `child` under `parent`.
    ///
    /// Rejected with [`DeployError::CyclicDependency`] when `child` is
    /// already a transitive ancestor of `parent`. Adding an edge that
    /// already exists is a no-op.
    pub fn add_child(&self, parent: NodeHandle, child: NodeHandle) -> DeployResult<()> {
        let mut graph = self.write();
        if !graph.contains_node(parent) || !graph.contains_node(child) {
            return Err(DeployError::StaleNode);
        }
        if parent == child || has_path_connecting(&*graph, child, parent, None) {
            return Err(DeployError::CyclicDependency);
        }
        if graph.find_edge(parent, child).is_none() {
            graph.add_edge(parent, child, ());
        }
        Ok(())
    }

    /// Detach `child` from `parent`. A child left with no parents becomes
    /// eligible for collection but is not swept implicitly.
    pub fn remove_child(&self, parent: NodeHandle, child: NodeHandle) -> DeployResult<()> {
        let mut graph = self.write();
        if !graph.contains_node(parent) || !graph.contains_node(child) {
            return Err(DeployError::StaleNode);
        }
        if let Some(edge) = graph.find_edge(parent, child) {
            graph.remove_edge(edge);
        }
        Ok(())
    }

    pub fn parents(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.read()
            .neighbors_directed(node, Direction::Incoming)
            .collect()
    }

    pub fn children(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.read()
            .neighbors_directed(node, Direction::Outgoing)
            .collect()
    }

    /// Breadth-first descendants of `node`, excluding `node` itself.
    ///
    /// Computed over a snapshot: the returned order is a finite, restartable
    /// sequence unaffected by structural mutation after this call returns.
    pub fn descendants(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.traverse(node, Direction::Outgoing)
    }

    /// Breadth-first ancestors of `node`, excluding `node` itself.
    pub fn ancestors(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.traverse(node, Direction::Incoming)
    }

    /// Remove `root` and every descendant unreachable from outside the
    /// removed set, returning the removed artifacts in sweep order.
    ///
    /// A descendant that is also reachable from some node outside the
    /// subtree (a shared dependency of another root) survives, as does its
    /// own subtree.
    pub fn sweep(&self, root: NodeHandle) -> Vec<Arc<InstallArtifact>> {
        let mut graph = self.write();
        if !graph.contains_node(root) {
            return Vec::new();
        }

        let mut doomed: HashSet<NodeHandle> = bfs(&graph, root, Direction::Outgoing);
        doomed.insert(root);

        // Fixpoint: a node with a surviving parent survives, which in turn
        // rescues its descendants on a later round.
        loop {
            let rescued: Vec<NodeHandle> = doomed
                .iter()
                .copied()
                .filter(|&n| {
                    n != root
                        && graph
                            .neighbors_directed(n, Direction::Incoming)
                            .any(|p| !doomed.contains(&p))
                })
                .collect();
            if rescued.is_empty() {
                break;
            }
            for node in rescued {
                doomed.remove(&node);
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for node in doomed {
            if let Some(artifact) = graph.remove_node(node) {
                removed.push(artifact);
            }
        }
        removed
    }

    fn traverse(&self, start: NodeHandle, direction: Direction) -> Vec<NodeHandle> {
        let graph = self.read();
        if !graph.contains_node(start) {
            return Vec::new();
        }
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut order = Vec::new();
        while let Some(node) = queue.pop_front() {
            for next in graph.neighbors_directed(node, direction) {
                if seen.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bfs(graph: &Inner, start: NodeHandle, direction: Direction) -> HashSet<NodeHandle> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for next in graph.neighbors_directed(node, direction) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.remove(&start);
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactIdentity, InertLifecycle, InstallArtifact};
    use crate::storage::ArtifactStore;
    use semver::Version;
    use std::path::{Path, PathBuf};

    struct StubStore(PathBuf);

    impl ArtifactStore for StubStore {
        fn artifact_fs(&self) -> &Path {
            &self.0
        }
        fn synchronize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn roll_back(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn delete(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn content_hash(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn artifact(name: &str) -> Arc<InstallArtifact> {
        Arc::new(InstallArtifact::new(
            ArtifactIdentity::new("bundle", name, Version::new(1, 0, 0)),
            Arc::new(StubStore(PathBuf::from("/nonexistent"))),
            Box::new(InertLifecycle),
        ))
    }

    #[test]
    fn insert_links_artifact_to_its_node() {
        let graph = ArtifactGraph::new();
        let a = artifact("a");
        let node = graph.insert(a.clone());
        assert_eq!(a.node(), Some(node));
        assert!(graph.contains(node));
    }

    #[test]
    fn cycle_is_rejected() {
        let graph = ArtifactGraph::new();
        let a = graph.insert(artifact("a"));
        let b = graph.insert(artifact("b"));
        let c = graph.insert(artifact("c"));
        graph.add_child(a, b).unwrap();
        graph.add_child(b, c).unwrap();

        assert!(matches!(
            graph.add_child(c, a),
            Err(DeployError::CyclicDependency)
        ));
        assert!(matches!(
            graph.add_child(a, a),
            Err(DeployError::CyclicDependency)
        ));
    }

    #[test]
    fn traversals_exclude_the_start_node() {
        let graph = ArtifactGraph::new();
        let a = graph.insert(artifact("a"));
        let b = graph.insert(artifact("b"));
        let c = graph.insert(artifact("c"));
        graph.add_child(a, b).unwrap();
        graph.add_child(b, c).unwrap();

        assert_eq!(graph.descendants(a), vec![b, c]);
        assert_eq!(graph.ancestors(c), vec![b, a]);
        assert!(graph.descendants(c).is_empty());
    }

    #[test]
    fn traversal_snapshot_survives_later_mutation() {
        let graph = ArtifactGraph::new();
        let a = graph.insert(artifact("a"));
        let b = graph.insert(artifact("b"));
        graph.add_child(a, b).unwrap();

        let snapshot = graph.descendants(a);
        graph.remove_child(a, b).unwrap();
        assert_eq!(snapshot, vec![b]);
        assert!(graph.descendants(a).is_empty());
    }

    #[test]
    fn sweep_spares_shared_dependencies() {
        // a -> shared <- b ; sweeping a must leave shared for b.
        let graph = ArtifactGraph::new();
        let a = graph.insert(artifact("a"));
        let b = graph.insert(artifact("b"));
        let shared = graph.insert(artifact("shared"));
        let leaf = graph.insert(artifact("leaf"));
        graph.add_child(a, shared).unwrap();
        graph.add_child(b, shared).unwrap();
        graph.add_child(shared, leaf).unwrap();

        let removed = graph.sweep(a);
        let names: Vec<String> = removed
            .iter()
            .map(|a| a.identity().name.clone())
            .collect();
        assert_eq!(names, vec!["a"]);
        assert!(graph.contains(shared));
        assert!(graph.contains(leaf));
        assert!(!graph.contains(a));
    }

    #[test]
    fn sweep_removes_exclusive_subtree() {
        let graph = ArtifactGraph::new();
        let a = graph.insert(artifact("a"));
        let child = graph.insert(artifact("child"));
        let leaf = graph.insert(artifact("leaf"));
        graph.add_child(a, child).unwrap();
        graph.add_child(child, leaf).unwrap();

        let removed = graph.sweep(a);
        assert_eq!(removed.len(), 3);
        assert_eq!(graph.node_count(), 0);
    }
}
