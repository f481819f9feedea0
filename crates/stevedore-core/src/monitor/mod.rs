//! Background stall detection for deployment operations.
//!
//! Ancillary safety net, never on the install critical path: the deployer
//! registers each operation with the [`ProgressTracker`], and a
//! [`StallMonitor`] thread periodically reports operations that have been
//! in flight longer than a configured threshold. The monitor is an
//! explicitly constructed value with a start/stop lifecycle, not ambient
//! process-wide state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::MonitorConfig;

/// Which deployment operation an in-flight entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Install,
    Refresh,
    Uninstall,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Refresh => "refresh",
            Self::Uninstall => "uninstall",
        };
        f.write_str(name)
    }
}

struct InFlight {
    kind: OperationKind,
    label: String,
    started: Instant,
    reported: bool,
}

#[derive(Default)]
struct TrackerState {
    next_id: u64,
    ops: HashMap<u64, InFlight>,
}

/// A stalled operation observed by the monitor.
#[derive(Debug, Clone)]
pub struct StalledOperation {
    pub kind: OperationKind,
    pub label: String,
    pub elapsed: Duration,
}

/// Registry of in-flight deployment operations.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; it stays registered until the guard drops.
    pub fn begin(&self, kind: OperationKind, label: impl Into<String>) -> OperationGuard<'_> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.ops.insert(
            id,
            InFlight {
                kind,
                label: label.into(),
                started: Instant::now(),
                reported: false,
            },
        );
        OperationGuard { tracker: self, id }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().ops.len()
    }

    /// Operations older than `threshold` that have not been reported yet.
    /// Each crossing is returned exactly once.
    pub fn stalled(&self, threshold: Duration) -> Vec<StalledOperation> {
        let mut state = self.lock();
        let mut found = Vec::new();
        for op in state.ops.values_mut() {
            let elapsed = op.started.elapsed();
            if !op.reported && elapsed >= threshold {
                op.reported = true;
                found.push(StalledOperation {
                    kind: op.kind,
                    label: op.label.clone(),
                    elapsed,
                });
            }
        }
        found
    }

    fn finish(&self, id: u64) {
        self.lock().ops.remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII handle for one tracked operation.
pub struct OperationGuard<'a> {
    tracker: &'a ProgressTracker,
    id: u64,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.id);
    }
}

struct Shutdown {
    requested: Mutex<bool>,
    signal: Condvar,
}

/// Background thread that reports stalled operations through `tracing`.
pub struct StallMonitor {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<Shutdown>,
}

impl StallMonitor {
    /// Spawn the monitor thread. With `enabled = false` in the config the
    /// returned monitor is inert.
    pub fn start(tracker: Arc<ProgressTracker>, config: &MonitorConfig) -> Self {
        let shutdown = Arc::new(Shutdown {
            requested: Mutex::new(false),
            signal: Condvar::new(),
        });

        if !config.enabled {
            return Self {
                handle: None,
                shutdown,
            };
        }

        let period = Duration::from_secs(config.period_secs.max(1));
        let threshold = Duration::from_secs(config.stall_threshold_secs.max(1));
        let thread_shutdown = shutdown.clone();

        let handle = std::thread::Builder::new()
            .name("stevedore-stall-monitor".into())
            .spawn(move || {
                debug!(period_secs = period.as_secs(), "stall monitor running");
                loop {
                    let requested = thread_shutdown
                        .requested
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    let (requested, _) = thread_shutdown
                        .signal
                        .wait_timeout_while(requested, period, |stop| !*stop)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *requested {
                        break;
                    }
                    drop(requested);

                    for stalled in tracker.stalled(threshold) {
                        warn!(
                            operation = %stalled.kind,
                            target = %stalled.label,
                            elapsed_secs = stalled.elapsed.as_secs(),
                            "deployment operation appears stalled"
                        );
                    }
                }
            })
            .ok();

        Self { handle, shutdown }
    }

    /// Ask the thread to exit and wait for it.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self
                .shutdown
                .requested
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = true;
            self.shutdown.signal.notify_all();
            let _ = handle.join();
        }
    }
}

impl Drop for StallMonitor {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
