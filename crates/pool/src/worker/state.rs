//! Worker record and state machine
//!
//! ```text
//!            assign                 success / failure
//!   ┌──────┐ ─────► ┌────────────┐ ─────────────────► ┌──────┐
//!   │ Idle │        │ Busy(task) │                     │ Idle │
//!   └──────┘ ◄───── └────────────┘ ──────────┐         └──────┘
//!      ▲   restart ok                        │ error_count > threshold
//!      │                                     ▼
//!   ┌────────────┐     begin_restart   ┌───────────┐
//!   │ Restarting │ ◄────────────────── │ Unhealthy │
//!   └────────────┘                     └───────────┘
//! ```
//!
//! The current task lives inside [`WorkerState::Busy`], so a worker is idle
//! exactly when it has no task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::snapshot::{WorkerSnapshot, WorkerStats, WorkerStatus};
use crate::recognizer::Recognizer;
use crate::task::{Task, TaskId};

/// A task currently executing on a worker
#[derive(Debug)]
pub(crate) struct Assignment {
    pub task: Task,
    pub cancel: CancellationToken,
    pub started: Instant,
}

#[derive(Debug)]
pub(crate) enum WorkerState {
    Idle,
    Busy(Assignment),
    Unhealthy,
    Restarting,
}

/// What an attempt needs to run outside the scheduler lock
pub(crate) struct AttemptContext {
    pub recognizer: Arc<dyn Recognizer>,
    pub cancel: CancellationToken,
}

/// One recognizer plus its scheduling and health state
pub(crate) struct Worker {
    pub id: Uuid,
    recognizer: Arc<dyn Recognizer>,
    state: WorkerState,
    pub stats: WorkerStats,
    pub created_at: DateTime<Utc>,
    pub last_used: Instant,
}

impl Worker {
    pub fn new(id: Uuid, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            id,
            recognizer,
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
            created_at: Utc::now(),
            last_used: Instant::now(),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        match self.state {
            WorkerState::Idle => WorkerStatus::Idle,
            WorkerState::Busy(_) => WorkerStatus::Busy,
            WorkerState::Unhealthy => WorkerStatus::Unhealthy,
            WorkerState::Restarting => WorkerStatus::Restarting,
        }
    }

    /// Idle and healthy: eligible for dispatch
    pub fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self.state, WorkerState::Unhealthy)
    }

    pub fn current_task(&self) -> Option<TaskId> {
        match &self.state {
            WorkerState::Busy(assignment) => Some(assignment.task.id),
            _ => None,
        }
    }

    /// Zero while busy
    pub fn idle_for(&self) -> Duration {
        match self.state {
            WorkerState::Busy(_) => Duration::ZERO,
            _ => self.last_used.elapsed(),
        }
    }

    pub fn recognizer(&self) -> Arc<dyn Recognizer> {
        Arc::clone(&self.recognizer)
    }

    /// Mark busy with `task` and hand back what the attempt needs
    ///
    /// Callers must only assign to idle workers.
    pub fn assign(&mut self, task: Task) -> AttemptContext {
        debug_assert!(self.is_idle(), "assigning to a non-idle worker");
        let cancel = CancellationToken::new();
        let now = Instant::now();
        self.last_used = now;
        self.state = WorkerState::Busy(Assignment {
            task,
            cancel: cancel.clone(),
            started: now,
        });
        AttemptContext {
            recognizer: Arc::clone(&self.recognizer),
            cancel,
        }
    }

    /// Take the assignment back if this worker is still running `task_id`
    ///
    /// Returns `None` when the task was already taken away by a removal,
    /// restart or shutdown; the attempt's outcome must then be discarded.
    /// On success the worker is left idle, its idle clock starting now.
    pub fn finish(&mut self, task_id: TaskId) -> Option<Assignment> {
        match &self.state {
            WorkerState::Busy(assignment) if assignment.task.id == task_id => {}
            _ => return None,
        }
        self.last_used = Instant::now();
        match std::mem::replace(&mut self.state, WorkerState::Idle) {
            WorkerState::Busy(assignment) => Some(assignment),
            _ => None,
        }
    }

    /// Record a failed attempt; quarantines the worker past `threshold` errors
    ///
    /// Returns true if the worker became unhealthy.
    pub fn record_failure(&mut self, error: String, threshold: u32) -> bool {
        self.stats.record_failure(error);
        if self.stats.error_count > threshold && self.is_idle() {
            self.state = WorkerState::Unhealthy;
            return true;
        }
        false
    }

    /// Cancel and detach the running task, if any, leaving the worker in `next`
    pub fn interrupt(&mut self, next: WorkerState) -> Option<Task> {
        match std::mem::replace(&mut self.state, next) {
            WorkerState::Busy(assignment) => {
                assignment.cancel.cancel();
                Some(assignment.task)
            }
            _ => None,
        }
    }

    /// Install a fresh recognizer after a successful restart
    pub fn complete_restart(&mut self, recognizer: Arc<dyn Recognizer>) {
        self.recognizer = recognizer;
        self.state = WorkerState::Idle;
        self.stats.restart_count += 1;
        self.stats.error_count = 0;
        self.last_used = Instant::now();
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            status: self.status(),
            current_task: self.current_task(),
            created_at: self.created_at,
            idle_for: self.idle_for(),
            stats: self.stats.clone(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{test_task, Priority};
    use crate::testing::ScriptedRecognizer;

    fn worker() -> Worker {
        Worker::new(Uuid::now_v7(), Arc::new(ScriptedRecognizer::default()))
    }

    #[test]
    fn test_new_worker_is_idle() {
        let worker = worker();
        assert!(worker.is_idle());
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert!(worker.current_task().is_none());
    }

    #[test]
    fn test_assign_and_finish() {
        let mut worker = worker();
        let (task, _rx) = test_task(1, Priority::Normal);

        let ctx = worker.assign(task);
        assert!(!ctx.cancel.is_cancelled());
        assert_eq!(worker.status(), WorkerStatus::Busy);
        assert_eq!(worker.current_task(), Some(TaskId(1)));

        assert!(worker.finish(TaskId(99)).is_none());
        let assignment = worker.finish(TaskId(1)).unwrap();
        assert_eq!(assignment.task.id, TaskId(1));
        assert!(worker.is_idle());
        assert!(worker.current_task().is_none());
    }

    #[test]
    fn test_quarantine_past_threshold() {
        let mut worker = worker();
        for _ in 0..3 {
            assert!(!worker.record_failure("boom".into(), 3));
        }
        assert!(worker.is_idle());
        assert!(worker.record_failure("boom".into(), 3));
        assert!(worker.is_unhealthy());
        assert_eq!(worker.stats.error_count, 4);
    }

    #[test]
    fn test_interrupt_cancels_running_task() {
        let mut worker = worker();
        let (task, _rx) = test_task(5, Priority::High);
        let ctx = worker.assign(task);

        let task = worker.interrupt(WorkerState::Restarting).unwrap();
        assert_eq!(task.id, TaskId(5));
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(worker.status(), WorkerStatus::Restarting);

        // A late finish from the cancelled attempt is ignored
        assert!(worker.finish(TaskId(5)).is_none());
    }

    #[test]
    fn test_complete_restart_resets_health() {
        let mut worker = worker();
        for _ in 0..4 {
            worker.record_failure("boom".into(), 3);
        }
        assert!(worker.interrupt(WorkerState::Restarting).is_none());

        worker.complete_restart(Arc::new(ScriptedRecognizer::default()));
        assert!(worker.is_idle());
        assert_eq!(worker.stats.restart_count, 1);
        assert_eq!(worker.stats.error_count, 0);
        assert_eq!(worker.stats.last_error.as_deref(), Some("boom"));
    }
}
