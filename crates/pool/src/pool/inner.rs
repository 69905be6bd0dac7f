//! Shared pool state
//!
//! All scheduler state (queue, worker map, counters) sits behind one
//! `parking_lot` mutex. Every mutation happens in a short critical section
//! that never spans an `.await`; recognizer calls, construction and teardown
//! run outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use super::metrics::PoolStatus;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::recognizer::RecognizerFactory;
use crate::task::TaskQueue;
use crate::worker::{Worker, WorkerStatus};

/// Handles owned by one Running period of the pool
pub(crate) struct RunContext {
    pub shutdown_tx: watch::Sender<bool>,
    pub loops: Vec<JoinHandle<()>>,
    pub started_at: Instant,
}

pub(crate) struct SchedulerState {
    pub status: PoolStatus,
    pub workers: HashMap<Uuid, Worker>,
    pub queue: TaskQueue,
    /// Workers whose recognizer is still being constructed
    pub pending_workers: usize,
    pub next_task_id: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub total_task_time: Duration,
    pub run: Option<RunContext>,
    /// `shutdown()` arrived while initialization was in progress
    pub shutdown_requested: bool,
    /// Outcome of the last failed initialization, for callers that waited on it
    pub last_init_error: Option<PoolError>,
    status_tx: watch::Sender<PoolStatus>,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            status: PoolStatus::Stopped,
            workers: HashMap::new(),
            queue: TaskQueue::new(),
            pending_workers: 0,
            next_task_id: 0,
            completed_count: 0,
            failed_count: 0,
            total_task_time: Duration::ZERO,
            run: None,
            shutdown_requested: false,
            last_init_error: None,
            status_tx: watch::channel(PoolStatus::Stopped).0,
        }
    }

    /// Change lifecycle status and notify anyone waiting on a transition
    pub fn set_status(&mut self, status: PoolStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PoolStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.status == PoolStatus::Running
    }

    /// Live workers plus those being created
    pub fn capacity(&self) -> usize {
        self.workers.len() + self.pending_workers
    }

    pub fn count(&self, status: WorkerStatus) -> usize {
        self.workers
            .values()
            .filter(|w| w.status() == status)
            .count()
    }

    /// Most recently used idle worker
    ///
    /// Reusing the warmest worker lets the others age past the idle timeout
    /// so the health check can evict them.
    pub fn idle_worker(&self) -> Option<Uuid> {
        self.workers
            .values()
            .filter(|w| w.is_idle())
            .max_by_key(|w| w.last_used)
            .map(|w| w.id)
    }

    /// Idle workers ordered from longest idle to most recently used
    pub fn idle_workers_oldest_first(&self) -> Vec<Uuid> {
        let mut idle: Vec<_> = self.workers.values().filter(|w| w.is_idle()).collect();
        idle.sort_by_key(|w| w.last_used);
        idle.into_iter().map(|w| w.id).collect()
    }

    /// Reserve a slot for a new worker if below `max_workers`
    pub fn reserve_worker(&mut self, max_workers: usize) -> bool {
        if self.capacity() >= max_workers {
            return false;
        }
        self.pending_workers += 1;
        true
    }
}

pub(crate) struct PoolInner {
    pub config: PoolConfig,
    pub factory: Arc<dyn RecognizerFactory>,
    pub state: Mutex<SchedulerState>,
}

impl PoolInner {
    pub fn new(config: PoolConfig, factory: Arc<dyn RecognizerFactory>) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(SchedulerState::new()),
        }
    }
}

/// Spawn a periodic control loop
///
/// The loop holds only a weak reference between ticks, so dropping every
/// pool handle also ends the loop. It exits when `shutdown_rx` changes.
/// A tick already in progress runs to completion before the loop exits.
pub(crate) fn spawn_loop<F, Fut>(
    inner: &Arc<PoolInner>,
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<PoolInner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(period) else {
            warn!(loop_name = name, ?period, "Interval out of range, loop disabled");
            let _ = shutdown_rx.changed().await;
            return;
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else {
                        debug!(loop_name = name, "Pool dropped");
                        break;
                    };
                    tick(inner).await;
                }
                _ = shutdown_rx.changed() => {
                    debug!(loop_name = name, "Shutdown requested");
                    break;
                }
            }
        }

        debug!(loop_name = name, "Loop exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRecognizer;

    fn add_worker(state: &mut SchedulerState) -> Uuid {
        let id = Uuid::now_v7();
        state
            .workers
            .insert(id, Worker::new(id, Arc::new(ScriptedRecognizer::default())));
        id
    }

    #[test]
    fn test_reserve_worker_respects_max() {
        let mut state = SchedulerState::new();
        add_worker(&mut state);
        assert!(state.reserve_worker(2));
        assert_eq!(state.capacity(), 2);
        assert!(!state.reserve_worker(2));
        assert_eq!(state.pending_workers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_period_waits_for_shutdown() {
        let inner = Arc::new(PoolInner::new(
            PoolConfig::default(),
            Arc::new(crate::testing::ScriptedRecognizerFactory::new()),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_loop(&inner, "test", Duration::MAX, shutdown_rx, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        assert_eq!(ticks.load(std::sync::atomic::Ordering::SeqCst), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_ordering() {
        let mut state = SchedulerState::new();
        let first = add_worker(&mut state);
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = add_worker(&mut state);

        assert_eq!(state.idle_worker(), Some(second));
        assert_eq!(state.idle_workers_oldest_first(), vec![first, second]);
        assert_eq!(state.count(WorkerStatus::Idle), 2);
    }
}
