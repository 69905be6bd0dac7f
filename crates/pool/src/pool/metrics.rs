//! Pool status and metrics

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::inner::SchedulerState;
use crate::config::duration_millis;
use crate::worker::{mean, WorkerStatus};

/// Pool lifecycle state
///
/// ```text
/// Stopped ──► Initializing ──► Running ──► ShuttingDown ──► Stopped
///                  │
///                  └── creation failure ──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Stopped,
    Initializing,
    Running,
    ShuttingDown,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Point-in-time pool metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub status: PoolStatus,
    pub total_workers: usize,
    /// Idle and healthy workers
    pub idle_workers: usize,
    pub busy_workers: usize,
    /// Quarantined or restarting workers
    pub unhealthy_workers: usize,
    /// Workers still being constructed
    pub pending_workers: usize,
    pub queued_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,

    /// Mean duration of completed tasks
    #[serde(with = "duration_millis")]
    pub average_task_time: Duration,

    #[serde(with = "duration_millis")]
    pub total_task_time: Duration,

    /// Time since the pool entered Running (zero when stopped)
    #[serde(with = "duration_millis")]
    pub uptime: Duration,
}

impl PoolMetrics {
    pub(crate) fn collect(state: &SchedulerState) -> Self {
        Self {
            status: state.status,
            total_workers: state.workers.len(),
            idle_workers: state.count(WorkerStatus::Idle),
            busy_workers: state.count(WorkerStatus::Busy),
            unhealthy_workers: state.count(WorkerStatus::Unhealthy)
                + state.count(WorkerStatus::Restarting),
            pending_workers: state.pending_workers,
            queued_tasks: state.queue.len(),
            completed_tasks: state.completed_count,
            failed_tasks: state.failed_count,
            average_task_time: mean(state.total_task_time, state.completed_count),
            total_task_time: state.total_task_time,
            uptime: state
                .run
                .as_ref()
                .map(|run| run.started_at.elapsed())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(PoolStatus::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(PoolStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_metrics_serialization() {
        let metrics = PoolMetrics {
            status: PoolStatus::Running,
            total_workers: 2,
            idle_workers: 1,
            busy_workers: 1,
            unhealthy_workers: 0,
            pending_workers: 0,
            queued_tasks: 3,
            completed_tasks: 10,
            failed_tasks: 1,
            average_task_time: Duration::from_millis(120),
            total_task_time: Duration::from_millis(1200),
            uptime: Duration::from_secs(60),
        };

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["average_task_time"], 120);
        assert_eq!(json["uptime"], 60_000);

        let parsed: PoolMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, metrics);
    }
}
