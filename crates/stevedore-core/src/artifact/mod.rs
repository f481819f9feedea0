//! Install artifacts: identity, lifecycle state, and the operations a
//! pipeline stage invokes against one deployed unit.

mod identity;
mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::error::{DeployError, DeployResult};
use crate::graph::NodeHandle;
use crate::storage::ArtifactStore;

pub use identity::ArtifactIdentity;
pub use state::ArtifactState;

/// Result of a refresh: either backing content changed and was re-applied,
/// or there was nothing to do. "Nothing to do" is not a failure; failures
/// travel on the `Err` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    NoOp,
}

/// Result of a start attempt that did not fail: the artifact either became
/// active or backed out because an abort was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Aborted,
}

/// Cloneable abort flag threaded through `start`.
///
/// An external watchdog can only act at artifact granularity: raising the
/// flag asks an in-progress start to back out at its next checkpoint, it
/// does not interrupt a blocking call.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-artifact-type lifecycle operations.
///
/// Implementations carry the bundle/plan/configuration specific logic; the
/// kernel only sequences the calls and owns the state machine around them.
pub trait ArtifactLifecycle: Send + Sync {
    /// Bring the artifact's runtime representation up.
    fn activate(&self, abort: &AbortSignal) -> anyhow::Result<()>;

    /// Take the runtime representation down.
    fn deactivate(&self) -> anyhow::Result<()>;

    /// Re-read backing storage and re-apply it if it changed.
    fn refresh(&self, store: &dyn ArtifactStore) -> anyhow::Result<RefreshOutcome>;

    /// Drop any runtime registration beyond deactivation.
    fn remove(&self) -> anyhow::Result<()>;
}

/// Lifecycle for artifacts with no runtime behaviour of their own, e.g.
/// configuration artifacts. Refresh never has anything to do.
#[derive(Debug, Default)]
pub struct InertLifecycle;

impl ArtifactLifecycle for InertLifecycle {
    fn activate(&self, _abort: &AbortSignal) -> anyhow::Result<()> {
        Ok(())
    }

    fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn refresh(&self, _store: &dyn ArtifactStore) -> anyhow::Result<RefreshOutcome> {
        Ok(RefreshOutcome::NoOp)
    }

    fn remove(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ArtifactInner {
    state: ArtifactState,
    properties: HashMap<String, serde_json::Value>,
    node: Option<NodeHandle>,
}

/// One deployable unit: identity, backing storage, per-type lifecycle, and
/// the state machine that guards every operation.
///
/// All state-changing operations serialize on the artifact's own lock, so a
/// concurrent `start` and `uninstall` run to completion one after the other
/// with no preemption.
pub struct InstallArtifact {
    identity: ArtifactIdentity,
    store: Arc<dyn ArtifactStore>,
    lifecycle: Box<dyn ArtifactLifecycle>,
    inner: Mutex<ArtifactInner>,
}

impl InstallArtifact {
    pub fn new(
        identity: ArtifactIdentity,
        store: Arc<dyn ArtifactStore>,
        lifecycle: Box<dyn ArtifactLifecycle>,
    ) -> Self {
        Self {
            identity,
            store,
            lifecycle,
            inner: Mutex::new(ArtifactInner {
                state: ArtifactState::Initial,
                properties: HashMap::new(),
                node: None,
            }),
        }
    }

    pub fn identity(&self) -> &ArtifactIdentity {
        &self.identity
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    pub fn state(&self) -> ArtifactState {
        self.lock().state
    }

    /// Graph node owning this artifact, once linked.
    pub fn node(&self) -> Option<NodeHandle> {
        self.lock().node
    }

    pub(crate) fn set_node(&self, node: NodeHandle) {
        self.lock().node = Some(node);
    }

    pub fn property(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().properties.get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: serde_json::Value) {
        self.lock().properties.insert(key.into(), value);
    }

    pub fn properties(&self) -> HashMap<String, serde_json::Value> {
        self.lock().properties.clone()
    }

    /// Stage backing content and move `Initial -> Installing -> Installed`.
    ///
    /// A synchronize failure leaves the artifact `Failed` and surfaces an
    /// undiagnosed error for the compensating pipeline to log.
    pub fn install(&self) -> DeployResult<()> {
        let mut inner = self.lock();
        transition(&mut inner, "install", ArtifactState::Installing)?;
        if let Err(err) = self.store.synchronize() {
            inner.state = ArtifactState::Failed;
            return Err(DeployError::failure(format!(
                "install of {} failed: {err:#}",
                self.identity
            )));
        }
        inner.state = ArtifactState::Installed;
        Ok(())
    }

    /// Move `Installed/Resolved -> Starting -> Active`.
    ///
    /// An activation failure reverts to `Installed` and propagates an
    /// undiagnosed error for the caller to log. An observed abort backs out
    /// the same way but is not an error.
    pub fn start(&self, abort: &AbortSignal) -> DeployResult<StartOutcome> {
        let mut inner = self.lock();
        if !inner.state.is_startable() {
            return Err(DeployError::IllegalTransition {
                op: "start",
                state: inner.state,
            });
        }
        inner.state = ArtifactState::Starting;

        if abort.is_aborted() {
            inner.state = ArtifactState::Installed;
            return Ok(StartOutcome::Aborted);
        }

        match self.lifecycle.activate(abort) {
            Ok(()) if abort.is_aborted() => {
                if let Err(err) = self.lifecycle.deactivate() {
                    warn!(artifact = %self.identity, error = format!("{err:#}"),
                        "deactivate after aborted start failed");
                }
                inner.state = ArtifactState::Installed;
                Ok(StartOutcome::Aborted)
            }
            Ok(()) => {
                inner.state = ArtifactState::Active;
                Ok(StartOutcome::Started)
            }
            Err(err) => {
                inner.state = ArtifactState::Installed;
                Err(DeployError::failure(format!(
                    "start of {} failed: {err:#}",
                    self.identity
                )))
            }
        }
    }

    /// Move `Active -> Stopping -> Resolved`.
    ///
    /// Best-effort: a deactivation failure is logged, never re-thrown, so
    /// stop cannot block teardown.
    pub fn stop(&self) -> DeployResult<()> {
        let mut inner = self.lock();
        transition(&mut inner, "stop", ArtifactState::Stopping)?;
        deactivate_logged(&self.identity, self.lifecycle.as_ref());
        inner.state = ArtifactState::Resolved;
        Ok(())
    }

    /// Re-read backing storage; legal while `Active`, `Installed`, or
    /// `Resolved`. Returns `NoOp` when the content is unchanged.
    pub fn refresh(&self) -> DeployResult<RefreshOutcome> {
        let inner = self.lock();
        if !matches!(
            inner.state,
            ArtifactState::Active | ArtifactState::Installed | ArtifactState::Resolved
        ) {
            return Err(DeployError::IllegalTransition {
                op: "refresh",
                state: inner.state,
            });
        }
        self.lifecycle.refresh(self.store.as_ref()).map_err(|err| {
            DeployError::failure(format!("refresh of {} failed: {err:#}", self.identity))
        })
    }

    /// Drive the artifact to `Uninstalled`, stopping it first when active.
    ///
    /// Idempotent: a second call is a no-op. Lifecycle and storage failures
    /// during teardown are logged and swallowed; the artifact always ends
    /// `Uninstalled`.
    pub fn uninstall(&self) -> DeployResult<()> {
        let mut inner = self.lock();
        if inner.state == ArtifactState::Uninstalled {
            return Ok(());
        }
        // stop is inlined here: the state lock is not reentrant
        if inner.state == ArtifactState::Active {
            inner.state = ArtifactState::Stopping;
            deactivate_logged(&self.identity, self.lifecycle.as_ref());
            inner.state = ArtifactState::Resolved;
        }
        transition(&mut inner, "uninstall", ArtifactState::Uninstalling)?;
        if let Err(err) = self.lifecycle.remove() {
            warn!(artifact = %self.identity, error = format!("{err:#}"),
                "removal failed during uninstall; continuing teardown");
        }
        if let Err(err) = self.store.delete() {
            warn!(artifact = %self.identity, error = format!("{err:#}"),
                "backing storage could not be deleted; model remains authoritative");
        }
        inner.state = ArtifactState::Uninstalled;
        inner.node = None;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ArtifactInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InstallArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallArtifact")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

fn transition(
    inner: &mut ArtifactInner,
    op: &'static str,
    next: ArtifactState,
) -> DeployResult<()> {
    if !inner.state.can_transition_to(next) {
        return Err(DeployError::IllegalTransition {
            op,
            state: inner.state,
        });
    }
    inner.state = next;
    Ok(())
}

fn deactivate_logged(identity: &ArtifactIdentity, lifecycle: &dyn ArtifactLifecycle) {
    if let Err(err) = lifecycle.deactivate() {
        warn!(artifact = %identity, error = format!("{err:#}"),
            "stop failed; continuing teardown");
    }
}
