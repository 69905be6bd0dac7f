//! Error types for the recognition pool
//!
//! Three layers of failure are distinguished:
//! - [`PoolError`] - returned synchronously by pool operations (construction,
//!   initialization, submission)
//! - [`TaskError`] - what a [`TaskHandle`](crate::TaskHandle) resolves to when a task
//!   does not produce a result
//! - [`AttemptError`] - a single failed execution attempt; absorbed by the retry path

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::recognizer::RecognizerError;

/// Errors returned by pool operations
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Configuration failed validation; no pool was created
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Submission attempted while the pool is not running
    #[error("pool not running")]
    NotRunning,

    /// Initialization attempted while a shutdown is still in progress
    #[error("pool shutting down")]
    ShuttingDown,

    /// A recognizer could not be constructed for a worker
    #[error("failed to create worker {worker_id}: {source}")]
    WorkerCreation {
        worker_id: Uuid,
        #[source]
        source: RecognizerError,
    },
}

/// Final failure delivered through a task's completion handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The pool shut down before the task produced a result
    #[error("pool shutting down")]
    ShuttingDown,

    /// Every attempt failed
    #[error("task failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// The worker executing the task was removed
    #[error("worker removed")]
    WorkerRemoved,

    /// The worker executing the task was restarted
    #[error("worker restarting")]
    WorkerRestarting,

    /// The pool was dropped without settling the task
    #[error("task abandoned by pool")]
    Abandoned,
}

/// A single failed execution attempt
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The recognizer did not settle before the task deadline
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// The recognizer rejected the operation
    #[error("recognizer operation failed: {0}")]
    Operation(#[from] RecognizerError),

    /// The attempt was cancelled by the pool (removal, restart or shutdown)
    #[error("attempt cancelled")]
    Cancelled,
}
