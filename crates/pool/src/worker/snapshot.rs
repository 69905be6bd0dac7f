//! Worker statistics and point-in-time snapshots

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::duration_millis;
use crate::task::TaskId;

/// Externally visible worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready for dispatch
    Idle,
    /// Executing a task
    Busy,
    /// Quarantined after repeated failures, waiting for the health check
    Unhealthy,
    /// Recognizer being replaced
    Restarting,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

/// Per-worker counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub tasks_completed: u64,

    #[serde(with = "duration_millis")]
    pub total_task_time: Duration,

    /// Mean duration of successful tasks
    #[serde(with = "duration_millis")]
    pub average_task_time: Duration,

    /// Failed attempts since creation or the last restart
    pub error_count: u32,

    pub last_error: Option<String>,

    pub restart_count: u32,
}

impl WorkerStats {
    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.tasks_completed += 1;
        self.total_task_time += elapsed;
        self.average_task_time = mean(self.total_task_time, self.tasks_completed);
    }

    pub(crate) fn record_failure(&mut self, error: String) {
        self.error_count += 1;
        self.last_error = Some(error);
    }
}

/// Point-in-time view of a worker, returned by
/// [`RecognitionPool::worker_states`](crate::RecognitionPool::worker_states)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: Uuid,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub created_at: DateTime<Utc>,

    /// Time since the worker last finished a task (or was created/restarted); zero while busy
    #[serde(with = "duration_millis")]
    pub idle_for: Duration,

    #[serde(flatten)]
    pub stats: WorkerStats,
}

impl WorkerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    pub fn is_healthy(&self) -> bool {
        self.status != WorkerStatus::Unhealthy
    }
}

/// Arithmetic mean of `count` durations summing to `total`
pub(crate) fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((total.as_nanos() / u128::from(count)) as u64)
}
