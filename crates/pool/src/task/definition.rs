//! Task model

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TaskError;
use crate::recognizer::{ImagePayload, RecognitionOutput};

/// Value delivered through a task's completion handle
pub type TaskResult = Result<RecognitionOutput, TaskError>;

/// Monotonically increasing task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Which recognizer operation a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Recognize,
    Detect,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recognize => write!(f, "recognize"),
            Self::Detect => write!(f, "detect"),
        }
    }
}

/// Scheduling priority, lowest to highest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// One level higher, capped at [`Priority::Urgent`]
    pub fn boosted(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High | Self::Urgent => Self::Urgent,
        }
    }
}

/// Per-submission overrides
///
/// # Example
///
/// ```
/// use lumen_pool::{Priority, SubmitOptions};
/// use std::time::Duration;
///
/// let options = SubmitOptions::new()
///     .with_priority(Priority::High)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Defaults to [`Priority::Normal`]
    pub priority: Option<Priority>,
    /// Defaults to the pool's `task_timeout`
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A scheduled unit of recognition work
///
/// Owned by the pool while queued and by the worker state while assigned.
/// [`Task::settle`] consumes the task, so a completion handle is settled at
/// most once.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: ImagePayload,
    pub priority: Priority,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    created_at: Instant,
    completion: oneshot::Sender<TaskResult>,
}

impl Task {
    pub fn new(
        id: TaskId,
        kind: TaskKind,
        payload: ImagePayload,
        priority: Priority,
        timeout: Duration,
        max_retries: u32,
        completion: oneshot::Sender<TaskResult>,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            priority,
            timeout,
            retry_count: 0,
            max_retries,
            created_at: Instant::now(),
            completion,
        }
    }

    /// Time since submission, including earlier attempts
    pub fn waited(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Attempts made so far, counting the one in flight
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a retry: bump the counter and raise priority one level
    pub fn prepare_retry(&mut self) {
        self.retry_count += 1;
        self.priority = self.priority.boosted();
    }

    /// Deliver the final result to the caller
    pub fn settle(self, result: TaskResult) {
        if self.completion.send(result).is_err() {
            debug!(task_id = %self.id, "Task handle dropped before settlement");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_task(id: u64, priority: Priority) -> (Task, oneshot::Receiver<TaskResult>) {
    let (tx, rx) = oneshot::channel();
    let task = Task::new(
        TaskId(id),
        TaskKind::Recognize,
        ImagePayload::new(vec![id as u8]),
        priority,
        Duration::from_secs(1),
        2,
        tx,
    );
    (task, rx)
}
