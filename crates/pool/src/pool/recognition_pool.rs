//! Public pool handle

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::inner::{spawn_loop, PoolInner, RunContext};
use super::lifecycle::terminate_recognizer;
use super::metrics::{PoolMetrics, PoolStatus};
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::recognizer::{ImagePayload, RecognizerFactory};
use crate::task::{SubmitOptions, Task, TaskHandle, TaskId, TaskKind};
use crate::worker::{Worker, WorkerSnapshot, WorkerState};

/// Bounded, self-healing pool of recognizer workers
///
/// Cloning is cheap and every clone drives the same pool; pass it to
/// whichever layer submits work.
///
/// # Example
///
/// ```ignore
/// use lumen_pool::{PoolConfig, Priority, RecognitionPool, SubmitOptions};
///
/// let pool = RecognitionPool::new(PoolConfig::from_env(), factory)?;
/// pool.initialize().await?;
///
/// let handle = pool.recognize(payload, SubmitOptions::new().with_priority(Priority::High))?;
/// let text = handle.await?.text();
///
/// pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct RecognitionPool {
    pub(super) inner: Arc<PoolInner>,
}

impl RecognitionPool {
    /// Create a stopped pool
    ///
    /// Fails with [`PoolError::InvalidConfig`] before anything is built.
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn RecognizerFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner::new(config, factory)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.state.lock().status
    }

    /// Create `min_workers` workers and start the control loops
    ///
    /// No-op if already running. A call made while another initialization
    /// is in progress waits for it and returns its outcome. Any worker
    /// creation failure aborts initialization, tears down the workers built
    /// so far and is returned.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let in_progress = {
            let mut state = self.inner.state.lock();
            match state.status {
                PoolStatus::Stopped => {
                    state.last_init_error = None;
                    state.shutdown_requested = false;
                    state.set_status(PoolStatus::Initializing);
                    None
                }
                PoolStatus::Initializing => Some(state.subscribe_status()),
                PoolStatus::Running => return Ok(()),
                PoolStatus::ShuttingDown => return Err(PoolError::ShuttingDown),
            }
        };
        if let Some(status_rx) = in_progress {
            return self.await_initialization(status_rx).await;
        }

        let config = &self.inner.config;
        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            language = %config.language,
            "Initializing recognition pool"
        );

        let results = join_all((0..config.min_workers).map(|_| self.inner.create_worker())).await;
        let (created, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        let workers: Vec<Worker> = created.into_iter().flatten().collect();

        if let Some(Err(error)) = errors.into_iter().next() {
            warn!(error = %error, "Worker creation failed during initialization");
            terminate_all(&workers).await;
            let mut state = self.inner.state.lock();
            state.shutdown_requested = false;
            state.last_init_error = Some(error.clone());
            state.set_status(PoolStatus::Stopped);
            return Err(error);
        }

        let workers = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if std::mem::take(&mut state.shutdown_requested) {
                state.set_status(PoolStatus::ShuttingDown);
                Some(workers)
            } else {
                for worker in workers {
                    state.workers.insert(worker.id, worker);
                }
                state.run = Some(self.start_loops());
                state.set_status(PoolStatus::Running);
                None
            }
        };

        if let Some(workers) = workers {
            info!(workers = workers.len(), "Shutdown requested during initialization");
            terminate_all(&workers).await;
            self.inner.state.lock().set_status(PoolStatus::Stopped);
            return Err(PoolError::ShuttingDown);
        }

        info!("Recognition pool running");
        self.inner.dispatch();
        Ok(())
    }

    /// Wait for an initialization started by another caller
    async fn await_initialization(
        &self,
        mut status_rx: watch::Receiver<PoolStatus>,
    ) -> Result<(), PoolError> {
        let _ = status_rx
            .wait_for(|status| *status != PoolStatus::Initializing)
            .await;

        let state = self.inner.state.lock();
        match state.status {
            PoolStatus::Running => Ok(()),
            _ => Err(state
                .last_init_error
                .clone()
                .unwrap_or(PoolError::ShuttingDown)),
        }
    }

    fn start_loops(&self) -> RunContext {
        let config = &self.inner.config;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            spawn_loop(
                &self.inner,
                "dispatch",
                config.dispatch_interval,
                shutdown_rx.clone(),
                |inner| async move { inner.dispatch() },
            ),
            spawn_loop(
                &self.inner,
                "health_check",
                config.health_check_interval,
                shutdown_rx.clone(),
                |inner| async move { inner.health_check().await },
            ),
            spawn_loop(
                &self.inner,
                "autoscale",
                config.scale_interval,
                shutdown_rx,
                |inner| async move { inner.autoscale().await },
            ),
        ];

        RunContext {
            shutdown_tx,
            loops,
            started_at: Instant::now(),
        }
    }

    /// Stop the loops, fail every queued and in-flight task, and tear down
    /// all workers
    ///
    /// Called during initialization, it makes that initialization tear
    /// down instead of starting and waits for the pool to stop. Otherwise a
    /// no-op unless running. A loop tick in progress is allowed to finish
    /// within `shutdown_timeout`. Recognizer termination errors are logged
    /// and otherwise ignored.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let timeout = self.inner.config.shutdown_timeout;

        let initializing = {
            let mut state = self.inner.state.lock();
            match state.status {
                PoolStatus::Running => None,
                PoolStatus::Initializing => {
                    state.shutdown_requested = true;
                    Some(state.subscribe_status())
                }
                PoolStatus::Stopped | PoolStatus::ShuttingDown => return,
            }
        };
        if let Some(mut status_rx) = initializing {
            info!("Shutdown requested during initialization");
            let stopped = status_rx.wait_for(|status| *status == PoolStatus::Stopped);
            if time::timeout(timeout, stopped).await.is_err() {
                warn!(?timeout, "Initialization did not stop in time");
            }
            return;
        }

        let (tasks, recognizers, run) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !state.is_running() {
                return;
            }
            state.set_status(PoolStatus::ShuttingDown);

            let mut tasks: Vec<Task> = state.queue.drain().collect();
            let mut recognizers = Vec::with_capacity(state.workers.len());
            for (worker_id, mut worker) in state.workers.drain() {
                if let Some(task) = worker.interrupt(WorkerState::Idle) {
                    tasks.push(task);
                }
                recognizers.push((worker_id, worker.recognizer()));
            }
            (tasks, recognizers, state.run.take())
        };

        info!(
            rejected_tasks = tasks.len(),
            workers = recognizers.len(),
            "Shutting down recognition pool"
        );

        for task in tasks {
            task.settle(Err(TaskError::ShuttingDown));
        }

        if let Some(run) = run {
            let _ = run.shutdown_tx.send(true);
            let aborts: Vec<_> = run.loops.iter().map(JoinHandle::abort_handle).collect();
            if time::timeout(timeout, join_all(run.loops)).await.is_err() {
                warn!(?timeout, "Control loops did not stop in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        join_all(
            recognizers
                .into_iter()
                .map(|(worker_id, recognizer)| terminate_recognizer(worker_id, recognizer)),
        )
        .await;

        self.inner.state.lock().set_status(PoolStatus::Stopped);
        info!("Recognition pool stopped");
    }

    /// Queue a text recognition task
    pub fn recognize(
        &self,
        payload: ImagePayload,
        options: SubmitOptions,
    ) -> Result<TaskHandle, PoolError> {
        self.submit(TaskKind::Recognize, payload, options)
    }

    /// Queue a text region detection task
    pub fn detect(
        &self,
        payload: ImagePayload,
        options: SubmitOptions,
    ) -> Result<TaskHandle, PoolError> {
        self.submit(TaskKind::Detect, payload, options)
    }

    /// Queue a task and attempt an immediate dispatch
    ///
    /// Fails with [`PoolError::NotRunning`] unless the pool is running.
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        kind: TaskKind,
        payload: ImagePayload,
        options: SubmitOptions,
    ) -> Result<TaskHandle, PoolError> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut state = self.inner.state.lock();
            if !state.is_running() {
                return Err(PoolError::NotRunning);
            }
            state.next_task_id += 1;
            let id = TaskId(state.next_task_id);
            let task = Task::new(
                id,
                kind,
                payload,
                options.priority.unwrap_or_default(),
                options.timeout.unwrap_or(self.inner.config.task_timeout),
                self.inner.config.max_retries,
                tx,
            );
            tracing::debug!(task_id = %id, %kind, priority = ?task.priority, "Task queued");
            state.queue.enqueue(task);
            id
        };

        self.inner.dispatch();
        Ok(TaskHandle::new(id, kind, rx))
    }

    /// Remove a worker, failing its in-flight task with
    /// [`TaskError::WorkerRemoved`]
    ///
    /// Returns false if no such worker exists. The health check restores
    /// `min_workers` on its next pass.
    pub async fn remove_worker(&self, worker_id: Uuid) -> bool {
        let removed = self.inner.remove_worker(worker_id).await;
        if removed {
            self.inner.replenish();
        }
        removed
    }

    /// Replace a worker's recognizer, keeping its id
    ///
    /// A failed replacement drops the worker and returns
    /// [`PoolError::WorkerCreation`].
    pub async fn restart_worker(&self, worker_id: Uuid) -> Result<(), PoolError> {
        if !self.inner.state.lock().is_running() {
            return Err(PoolError::NotRunning);
        }
        self.inner.restart_worker(worker_id).await
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics::collect(&self.inner.state.lock())
    }

    /// Snapshot of every worker, oldest first
    pub fn worker_states(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .state
            .lock()
            .workers
            .values()
            .map(|w| w.snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }
}

async fn terminate_all(workers: &[Worker]) {
    join_all(
        workers
            .iter()
            .map(|worker| terminate_recognizer(worker.id, worker.recognizer())),
    )
    .await;
}

impl std::fmt::Debug for RecognitionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionPool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::recognizer::RecognitionOutput;
    use crate::task::Priority;
    use crate::testing::{Behavior, ScriptedRecognizerFactory};

    fn pool(factory: &ScriptedRecognizerFactory, config: PoolConfig) -> RecognitionPool {
        RecognitionPool::new(config, Arc::new(factory.clone())).unwrap()
    }

    fn payload(text: &str) -> ImagePayload {
        ImagePayload::new(text.as_bytes().to_vec())
    }

    #[test]
    fn test_invalid_config_creates_nothing() {
        let factory = ScriptedRecognizerFactory::new();
        let zero_min = RecognitionPool::new(
            PoolConfig::default().with_min_workers(0),
            Arc::new(factory.clone()),
        );
        assert!(matches!(zero_min, Err(PoolError::InvalidConfig(_))));

        let inverted = RecognitionPool::new(
            PoolConfig::default().with_min_workers(3).with_max_workers(2),
            Arc::new(factory.clone()),
        );
        assert!(matches!(inverted, Err(PoolError::InvalidConfig(_))));
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_initialize_creates_min_workers() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default().with_min_workers(3).with_max_workers(5));

        pool.initialize().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Running);
        assert_eq!(pool.metrics().total_workers, 3);

        // Second call is a no-op
        pool.initialize().await.unwrap();
        assert_eq!(factory.created(), 3);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let factory = ScriptedRecognizerFactory::new();
        factory.fail_next_creations(1);
        let pool = pool(&factory, PoolConfig::default().with_min_workers(3));

        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerCreation { .. }));
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.terminated(), 2);
        assert!(pool.worker_states().is_empty());
    }

    fn spawn_initialize(pool: &RecognitionPool) -> tokio::task::JoinHandle<Result<(), PoolError>> {
        let pool = pool.clone();
        tokio::spawn(async move { pool.initialize().await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_initialize_waits_for_running() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_creation_latency(Duration::from_millis(100));
        let pool = pool(&factory, PoolConfig::default());

        let first = spawn_initialize(&pool);
        tokio::task::yield_now().await;
        assert_eq!(pool.status(), PoolStatus::Initializing);

        // Returns only once the pool accepts work
        pool.initialize().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Running);
        let handle = pool.recognize(payload("ready"), SubmitOptions::new()).unwrap();
        assert_eq!(handle.await.unwrap().text(), "ready");

        first.await.unwrap().unwrap();
        assert_eq!(factory.created(), 1);

        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_initialize_shares_failure() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_creation_latency(Duration::from_millis(100));
        factory.fail_next_creations(1);
        let pool = pool(&factory, PoolConfig::default());

        let first = spawn_initialize(&pool);
        tokio::task::yield_now().await;
        assert_eq!(pool.status(), PoolStatus::Initializing);

        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerCreation { .. }));
        assert!(matches!(
            first.await.unwrap(),
            Err(PoolError::WorkerCreation { .. })
        ));
        assert_eq!(pool.status(), PoolStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_initialize_tears_down() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_creation_latency(Duration::from_millis(100));
        let pool = pool(&factory, PoolConfig::default().with_min_workers(2));

        let first = spawn_initialize(&pool);
        tokio::task::yield_now().await;
        assert_eq!(pool.status(), PoolStatus::Initializing);

        pool.shutdown().await;
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert!(matches!(first.await.unwrap(), Err(PoolError::ShuttingDown)));
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.terminated(), 2);
        assert!(pool.worker_states().is_empty());

        let err = pool.recognize(payload("late"), SubmitOptions::new()).unwrap_err();
        assert!(matches!(err, PoolError::NotRunning));

        // A later initialize starts normally
        pool.initialize().await.unwrap();
        assert_eq!(pool.metrics().total_workers, 2);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_eviction_finish() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(
            &factory,
            PoolConfig::default()
                .with_max_workers(3)
                .with_idle_timeout(Duration::from_secs(1))
                .with_health_check_interval(Duration::from_secs(2)),
        );
        pool.initialize().await.unwrap();
        for _ in 0..2 {
            let worker = pool.inner.create_worker().await.unwrap();
            pool.inner.state.lock().workers.insert(worker.id, worker);
        }
        factory.set_termination_latency(Duration::from_millis(500));

        // Health check detaches both extra workers and is still tearing them down
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(pool.metrics().total_workers, 1);
        assert_eq!(factory.terminated(), 0);

        pool.shutdown().await;
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert_eq!(factory.terminated(), 3);
    }

    #[tokio::test]
    async fn test_submit_requires_running_pool() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default());

        let err = pool.recognize(payload("x"), SubmitOptions::new()).unwrap_err();
        assert!(matches!(err, PoolError::NotRunning));
        assert_eq!(pool.metrics().queued_tasks, 0);
    }

    #[tokio::test]
    async fn test_recognize_and_detect() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default());
        pool.initialize().await.unwrap();

        let text = pool.recognize(payload("hello"), SubmitOptions::new()).unwrap();
        let regions = pool.detect(payload("world"), SubmitOptions::new()).unwrap();
        assert!(regions.id() > text.id());

        assert_eq!(text.await, Ok(RecognitionOutput::Text("hello".into())));
        let regions = regions.await.unwrap().into_regions().unwrap();
        assert_eq!(regions[0].text, "world");

        let metrics = pool.metrics();
        assert_eq!(metrics.completed_tasks, 2);
        assert_eq!(metrics.failed_tasks, 0);

        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_queued_and_in_flight() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_behavior(Behavior::Hang);
        let pool = pool(&factory, PoolConfig::default().with_max_workers(1));
        pool.initialize().await.unwrap();

        let in_flight = pool.recognize(payload("a"), SubmitOptions::new()).unwrap();
        let queued = pool
            .recognize(payload("b"), SubmitOptions::new().with_priority(Priority::Urgent))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.metrics().busy_workers, 1);
        assert_eq!(pool.metrics().queued_tasks, 1);

        pool.shutdown().await;
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert_eq!(in_flight.await, Err(TaskError::ShuttingDown));
        assert_eq!(queued.await, Err(TaskError::ShuttingDown));
        assert_eq!(factory.terminated(), 1);

        let err = pool.recognize(payload("c"), SubmitOptions::new()).unwrap_err();
        assert!(matches!(err, PoolError::NotRunning));

        // Idempotent
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_pool_can_restart_after_shutdown() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default());

        pool.initialize().await.unwrap();
        pool.shutdown().await;
        pool.initialize().await.unwrap();

        let handle = pool.recognize(payload("again"), SubmitOptions::new()).unwrap();
        assert_eq!(handle.await.unwrap().text(), "again");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_states_snapshot() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default().with_min_workers(2));
        pool.initialize().await.unwrap();

        let states = pool.worker_states();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.is_idle() && s.is_healthy()));
        assert!(states.iter().all(|s| s.current_task.is_none()));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_removed_worker_is_replaced() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = pool(&factory, PoolConfig::default());
        pool.initialize().await.unwrap();

        let id = pool.worker_states()[0].id;
        assert!(pool.remove_worker(id).await);
        assert!(!pool.remove_worker(id).await);

        for _ in 0..100 {
            if pool.metrics().total_workers == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let states = pool.worker_states();
        assert_eq!(states.len(), 1);
        assert_ne!(states[0].id, id);
        assert_eq!(factory.created(), 2);

        pool.shutdown().await;
        assert!(matches!(
            pool.restart_worker(id).await,
            Err(PoolError::NotRunning)
        ));
    }
}
