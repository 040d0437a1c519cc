//! Per-patch controller: work queue, watches and workers around one
//! [`LockedPatchReconciler`].

use std::sync::Arc;
use std::time::Duration;

use patchlock_core::ObjectReference;
use patchlock_store::{DynStore, WatchHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::EngineError;
use crate::patch::LockedPatch;
use crate::queue::WorkQueue;
use crate::reconciler::{LockedPatchReconciler, Reconciler};
use crate::status::{PatchStatus, StatusObserver};
use crate::watch::{EnqueueRequestForPatch, WatchRegistrar};

/// A running engine instance.
///
/// Watches feed the queue, workers drain it. Dropping the controller stops
/// its watches and its workers; call [`PatchController::shutdown`] to also
/// wait for the workers to finish.
pub struct PatchController {
    reconciler: Arc<LockedPatchReconciler>,
    queue: Arc<WorkQueue>,
    watches: Vec<WatchHandle>,
    workers: Vec<JoinHandle<()>>,
}

impl PatchController {
    /// Registers watches for every reference of `patch` and starts workers.
    ///
    /// Watches deliver the current state of every referenced object, so the
    /// first reconcile happens without waiting for a change.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is invalid or any watch cannot be
    /// established; nothing keeps running in that case.
    pub async fn start(
        store: DynStore,
        patch: LockedPatch,
        parent: ObjectReference,
        observer: Option<Arc<dyn StatusObserver>>,
        config: &ControllerConfig,
    ) -> Result<Self, EngineError> {
        let reconciler = Arc::new(LockedPatchReconciler::new(store, patch, parent, observer)?);
        let queue = WorkQueue::shared(
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        );

        let handler = Arc::new(EnqueueRequestForPatch::new(
            Arc::clone(&queue),
            reconciler.key(),
        ));
        let registrar = WatchRegistrar::new(reconciler.resolver().clone(), handler);
        let watches = registrar.register(reconciler.patch().references()).await?;

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&reconciler) as Arc<dyn Reconciler>,
                ))
            })
            .collect();

        info!(
            patch = %reconciler.key(),
            watches = watches.len(),
            workers = config.workers.max(1),
            "Patch controller started"
        );

        Ok(Self {
            reconciler,
            queue,
            watches,
            workers,
        })
    }

    pub fn key(&self) -> &str {
        self.reconciler.key()
    }

    pub fn status(&self) -> PatchStatus {
        self.reconciler.status()
    }

    pub fn reconciler(&self) -> &Arc<LockedPatchReconciler> {
        &self.reconciler
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Number of established watches.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Stops watches and workers. A cycle in progress runs to completion.
    pub async fn shutdown(mut self) {
        let key = self.reconciler.key().to_string();
        for watch in std::mem::take(&mut self.watches) {
            watch.stop();
        }
        self.queue.shutdown();
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                warn!(patch = %key, error = %e, "Worker ended abnormally");
            }
        }
        info!(patch = %key, "Patch controller stopped");
    }
}

impl Drop for PatchController {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}

impl std::fmt::Debug for PatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchController")
            .field("key", &self.key())
            .field("watches", &self.watches.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Drains the queue until it shuts down.
///
/// Success forgets the key's failure history; failure requeues it with
/// backoff.
pub async fn run_worker(id: usize, queue: Arc<WorkQueue>, reconciler: Arc<dyn Reconciler>) {
    debug!(worker = id, "Worker started");

    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(()) => queue.forget(&key),
            Err(_) => queue.add_rate_limited(key.clone()),
        }
        queue.done(&key);
    }

    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Reconciler for Flaky {
        async fn reconcile(&self, _key: &str) -> Result<(), ReconcileError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ReconcileError::Convert(crate::error::TemplateError::Conversion(
                    "not yet".into(),
                )))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_worker_retries_until_success() {
        let queue = WorkQueue::shared(Duration::from_millis(1), Duration::from_millis(10));
        let reconciler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 3,
        });
        let worker = tokio::spawn(run_worker(
            0,
            Arc::clone(&queue),
            Arc::clone(&reconciler) as Arc<dyn Reconciler>,
        ));

        queue.add("k");
        tokio::time::timeout(Duration::from_secs(2), async {
            while reconciler.calls.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(queue.num_requeues("k"), 0);

        queue.shutdown();
        worker.await.unwrap();
    }
}
