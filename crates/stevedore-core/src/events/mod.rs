//! Failure reporting seam between the kernel and the embedder's event
//! subsystem. The kernel invokes the sink exactly once per distinct failure;
//! what happens to the report (event bus, audit log) is the embedder's
//! business.

use std::fmt;

use tracing::error;

use crate::error::DeployError;

/// Which deployment operation a reported failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Install,
    Refresh,
    Uninstall,
    Start,
    Stop,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Refresh => "refresh",
            Self::Uninstall => "uninstall",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Receives one report per distinct failure.
pub trait FailureSink: Send + Sync {
    fn failure(&self, kind: FailureKind, error: Option<&DeployError>);
}

/// Default sink: reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn failure(&self, kind: FailureKind, error: Option<&DeployError>) {
        match error {
            Some(err) => error!(operation = %kind, error = %err, "deployment failure"),
            None => error!(operation = %kind, "deployment failure"),
        }
    }
}

/// Sink that drops every report. Useful in tests and embedders that handle
/// failures entirely through returned errors.
#[derive(Debug, Default)]
pub struct NullFailureSink;

impl FailureSink for NullFailureSink {
    fn failure(&self, _kind: FailureKind, _error: Option<&DeployError>) {}
}
