//! Error taxonomy for deployment operations.

use thiserror::Error;
use url::Url;

use crate::artifact::{ArtifactIdentity, ArtifactState};

/// Result alias used throughout the pipeline and model layers.
pub type DeployResult<T> = Result<T, DeployError>;

/// Failures raised by pipeline stages, the runtime model, and the graph.
///
/// `DeploymentFailed` and `UnsatisfiedDependencies` carry a `diagnosed` flag:
/// once a compensating pipeline has logged the failure it marks the error
/// diagnosed so outer layers do not log the same root cause again. The
/// model-integrity variants are surfaced directly to the caller of `add` and
/// never pass through a second logging layer, so they carry no flag.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A stage failed in an expected, rollback-recoverable way.
    #[error("{message}")]
    DeploymentFailed { message: String, diagnosed: bool },

    /// Dependency resolution for an artifact could not be satisfied.
    #[error("unable to satisfy dependencies of {identity}: {detail}")]
    UnsatisfiedDependencies {
        identity: ArtifactIdentity,
        detail: String,
        diagnosed: bool,
    },

    /// An artifact with this identity is already deployed as a root.
    #[error("artifact {identity} is already deployed")]
    DuplicateIdentity { identity: ArtifactIdentity },

    /// The normalized location is already mapped to a deployed root.
    #[error("location {location} is already deployed")]
    DuplicateLocation { location: Url },

    /// Another root with the same final path segment is already deployed.
    #[error("file name '{file_name}' is already deployed from {existing}")]
    DuplicateFileName { file_name: String, existing: Url },

    /// The requested lifecycle operation is not legal in the current state.
    #[error("{op} is not legal in state {state}")]
    IllegalTransition {
        op: &'static str,
        state: ArtifactState,
    },

    /// Adding the requested edge would make the artifact graph cyclic.
    #[error("edge would make the artifact graph cyclic")]
    CyclicDependency,

    /// No deployed artifact matches the given identity.
    #[error("unknown artifact {identity}")]
    NotFound { identity: ArtifactIdentity },

    /// A node handle no longer refers to a live graph node.
    #[error("stale artifact graph node handle")]
    StaleNode,

    /// Underlying storage or lifecycle failure outside the taxonomy.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// An undiagnosed deployment failure with the given message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::DeploymentFailed {
            message: message.into(),
            diagnosed: false,
        }
    }

    /// An undiagnosed dependency-resolution failure.
    pub fn unsatisfied(identity: ArtifactIdentity, detail: impl Into<String>) -> Self {
        Self::UnsatisfiedDependencies {
            identity,
            detail: detail.into(),
            diagnosed: false,
        }
    }

    /// Whether this failure has already been logged by a lower layer.
    pub fn is_diagnosed(&self) -> bool {
        matches!(
            self,
            Self::DeploymentFailed {
                diagnosed: true,
                ..
            } | Self::UnsatisfiedDependencies {
                diagnosed: true,
                ..
            }
        )
    }

    /// Mark the failure as logged. No-op for variants without the flag.
    pub fn into_diagnosed(mut self) -> Self {
        match &mut self {
            Self::DeploymentFailed { diagnosed, .. }
            | Self::UnsatisfiedDependencies { diagnosed, .. } => *diagnosed = true,
            _ => {}
        }
        self
    }
}
