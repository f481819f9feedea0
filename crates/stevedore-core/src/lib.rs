//! Stevedore Core Library
//!
//! Deployment kernel: compensating install pipelines over a DAG of
//! artifacts, plus the runtime model of what is currently deployed.
//!
//! The kernel owns sequencing, state machines, and graph bookkeeping.
//! Everything artifact-type specific (manifest parsing, runtime adapters,
//! remote repositories, front ends) is injected through the narrow seams in
//! [`storage`], [`deploy`], [`events`], and [`model`].

pub mod artifact;
pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod storage;

/// Re-exports of commonly used types
pub mod prelude {
    // Artifacts
    pub use crate::artifact::{
        AbortSignal, ArtifactIdentity, ArtifactLifecycle, ArtifactState, InertLifecycle,
        InstallArtifact, RefreshOutcome, StartOutcome,
    };

    // Errors
    pub use crate::error::{DeployError, DeployResult};

    // Graph
    pub use crate::graph::{ArtifactGraph, NodeHandle};

    // Pipelines
    pub use crate::pipeline::{
        ArtifactVisitor, CommitStage, CompensatingPipeline, FnStage, InstallEnvironment, Pipeline,
        PipelineStage, UninstallStage, VisitStage,
    };

    // Runtime model
    pub use crate::model::{
        DeploymentRecord, LocationNormalizer, RuntimeArtifactModel, StandardNormalizer,
    };

    // Deployment
    pub use crate::deploy::{
        ArtifactBuilder, DeployOptions, Deployer, DirStoreProvider, InertLifecycleProvider,
        LifecycleProvider, StoreProvider,
    };

    // Storage
    pub use crate::storage::{ArtifactStore, DirArtifactStore, IdentityDeterminer};

    // Events
    pub use crate::events::{FailureKind, FailureSink, NullFailureSink, TracingFailureSink};

    // Configuration & monitoring
    pub use crate::config::{KernelConfig, MonitorConfig};
    pub use crate::monitor::{OperationKind, ProgressTracker, StallMonitor};
}
