//! Runtime registry: one committee driver per registered runtime.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conclave_core::{BatchExecutor, RoundFinalizer};
use conclave_types::RuntimeId;

use crate::config::NodeConfig;
use crate::driver::CommitteeDriver;
use crate::router::CommitteeHandle;

struct RuntimeEntry {
    handle: CommitteeHandle,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Registry of runtime committees hosted by this node.
///
/// Each registered runtime gets its own state machine, event queue, and
/// driver task; runtimes are fully independent (a stalled cancellation in one
/// never delays events for another). There is no implicit global state —
/// dropping the registry after [`shutdown`](CommitteeRegistry::shutdown)
/// leaves nothing running.
pub struct CommitteeRegistry {
    entries: DashMap<RuntimeId, RuntimeEntry>,
    shutdown: CancellationToken,
}

impl CommitteeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a runtime and spawn its committee driver.
    ///
    /// Idempotent: registering an already-hosted runtime returns the existing
    /// handle.
    pub fn register(
        &self,
        runtime: RuntimeId,
        executor: Arc<dyn BatchExecutor>,
        finalizer: Arc<dyn RoundFinalizer>,
        config: NodeConfig,
    ) -> CommitteeHandle {
        if let Some(entry) = self.entries.get(&runtime) {
            warn!(%runtime, "runtime already registered");
            return entry.handle.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CommitteeHandle::new(runtime, tx);
        let driver = CommitteeDriver::new(runtime, executor, finalizer, rx, config);
        let shutdown = self.shutdown.child_token();
        let task = tokio::spawn(driver.run(shutdown.clone()));

        self.entries.insert(
            runtime,
            RuntimeEntry {
                handle: handle.clone(),
                task,
                shutdown,
            },
        );
        conclave_metrics::set_active_runtimes(self.entries.len());
        info!(%runtime, "runtime registered");
        handle
    }

    /// Get the producer handle for a registered runtime.
    pub fn handle(&self, runtime: &RuntimeId) -> Option<CommitteeHandle> {
        self.entries.get(runtime).map(|entry| entry.handle.clone())
    }

    /// Number of registered runtimes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no runtimes are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop one runtime's driver, draining any in-flight execution.
    pub async fn deregister(&self, runtime: &RuntimeId) -> bool {
        let Some((_, entry)) = self.entries.remove(runtime) else {
            return false;
        };
        entry.shutdown.cancel();
        if let Err(err) = entry.task.await {
            warn!(%runtime, error = %err, "committee driver task failed");
        }
        conclave_metrics::set_active_runtimes(self.entries.len());
        debug!(%runtime, "runtime deregistered");
        true
    }

    /// Stop every driver, draining in-flight executions before returning.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let runtimes: Vec<RuntimeId> = self.entries.iter().map(|e| *e.key()).collect();
        for runtime in runtimes {
            if let Some((_, entry)) = self.entries.remove(&runtime) {
                if let Err(err) = entry.task.await {
                    warn!(%runtime, error = %err, "committee driver task failed");
                }
            }
        }
        conclave_metrics::set_active_runtimes(0);
        info!("committee registry shut down");
    }
}

impl Default for CommitteeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
