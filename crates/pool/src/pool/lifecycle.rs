//! Worker creation, removal and restart

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::inner::{PoolInner, SchedulerState};
use crate::error::{PoolError, TaskError};
use crate::recognizer::Recognizer;
use crate::worker::{Worker, WorkerState, WorkerStatus};

impl PoolInner {
    /// Construct a recognizer and wrap it in a new idle worker
    pub(crate) async fn create_worker(&self) -> Result<Worker, PoolError> {
        let worker_id = Uuid::now_v7();
        let recognizer = self
            .factory
            .create(&self.config.language)
            .await
            .map_err(|source| PoolError::WorkerCreation { worker_id, source })?;

        info!(%worker_id, language = %self.config.language, "Worker created");
        Ok(Worker::new(worker_id, recognizer))
    }

    /// Create a worker in the background
    ///
    /// The caller must already have reserved the slot with
    /// [`SchedulerState::reserve_worker`]. Failures are logged and the slot
    /// released.
    pub(crate) fn spawn_worker_creation(self: &Arc<Self>, reason: &'static str) {
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let result = inner.create_worker().await;

            let orphan = {
                let mut state = inner.state.lock();
                state.pending_workers = state.pending_workers.saturating_sub(1);
                match result {
                    Ok(worker) if state.is_running() => {
                        info!(worker_id = %worker.id, reason, "Worker added");
                        state.workers.insert(worker.id, worker);
                        None
                    }
                    Ok(worker) => Some((worker.id, worker.recognizer())),
                    Err(e) => {
                        warn!(error = %e, reason, "Worker creation failed");
                        None
                    }
                }
            };

            match orphan {
                Some((worker_id, recognizer)) => {
                    // Pool stopped while the recognizer was being built
                    terminate_recognizer(worker_id, recognizer).await;
                }
                None => inner.dispatch(),
            }
        });
    }

    /// Remove a worker, failing its in-flight task with `WorkerRemoved`
    ///
    /// Returns false if the worker no longer exists.
    #[instrument(skip(self))]
    pub(crate) async fn remove_worker(&self, worker_id: Uuid) -> bool {
        let recognizer = {
            let mut state = self.state.lock();
            detach_worker(&mut state, worker_id)
        };

        match recognizer {
            Some(recognizer) => {
                terminate_recognizer(worker_id, recognizer).await;
                info!(%worker_id, "Worker removed");
                true
            }
            None => false,
        }
    }

    /// Replace a worker's recognizer in place, keeping its id
    ///
    /// An in-flight task is failed with `WorkerRestarting`. If the
    /// replacement cannot be built the worker is dropped from the pool.
    #[instrument(skip(self))]
    pub(crate) async fn restart_worker(self: &Arc<Self>, worker_id: Uuid) -> Result<(), PoolError> {
        let old = {
            let mut state = self.state.lock();
            let Some(worker) = state.workers.get_mut(&worker_id) else {
                return Ok(());
            };
            if worker.status() == WorkerStatus::Restarting {
                return Ok(());
            }
            if let Some(task) = worker.interrupt(WorkerState::Restarting) {
                warn!(%worker_id, task_id = %task.id, "Failing in-flight task for restart");
                task.settle(Err(TaskError::WorkerRestarting));
            }
            worker.recognizer()
        };

        terminate_recognizer(worker_id, old).await;

        match self.factory.create(&self.config.language).await {
            Ok(recognizer) => {
                let stale = {
                    let mut state = self.state.lock();
                    match state.workers.get_mut(&worker_id) {
                        Some(worker) => {
                            worker.complete_restart(recognizer);
                            info!(
                                %worker_id,
                                restart_count = worker.stats.restart_count,
                                "Worker restarted"
                            );
                            None
                        }
                        None => Some(recognizer),
                    }
                };
                match stale {
                    Some(recognizer) => terminate_recognizer(worker_id, recognizer).await,
                    None => self.dispatch(),
                }
                Ok(())
            }
            Err(source) => {
                self.state.lock().workers.remove(&worker_id);
                warn!(%worker_id, error = %source, "Worker restart failed, worker dropped");
                Err(PoolError::WorkerCreation { worker_id, source })
            }
        }
    }
}

/// Take a worker out of the map, failing its in-flight task
///
/// Runs inside the scheduler lock; the returned recognizer must be
/// terminated afterwards.
pub(crate) fn detach_worker(
    state: &mut SchedulerState,
    worker_id: Uuid,
) -> Option<Arc<dyn Recognizer>> {
    let mut worker = state.workers.remove(&worker_id)?;
    if let Some(task) = worker.interrupt(WorkerState::Idle) {
        warn!(%worker_id, task_id = %task.id, "Failing in-flight task for removed worker");
        task.settle(Err(TaskError::WorkerRemoved));
    }
    Some(worker.recognizer())
}

/// Best-effort recognizer teardown
pub(crate) async fn terminate_recognizer(worker_id: Uuid, recognizer: Arc<dyn Recognizer>) {
    if let Err(e) = recognizer.terminate().await {
        warn!(%worker_id, error = %e, "Recognizer termination failed");
    }
}
