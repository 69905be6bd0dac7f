//! # Lumen Recognition Pool
//!
//! A bounded, self-healing pool of text-recognition workers.
//!
//! ## Features
//!
//! - **Priority scheduling**: descending priority, FIFO within a priority
//! - **Retries with deadlines**: every attempt races a timeout; failed attempts are retried up to `max_retries`
//! - **Real cancellation**: abandoned recognizer calls are cancelled through a token
//! - **Self-healing**: workers crossing an error threshold are quarantined and restarted
//! - **Auto-scaling**: worker count follows queue pressure within `[min_workers, max_workers]`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecognitionPool                          │
//! │  (submission, lifecycle, metrics, worker snapshots)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Task queue                              │
//! │  (priority ordered; retries requeued per RetryPlacement)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Workers                                │
//! │  (one Recognizer each, built by a RecognizerFactory)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use lumen_pool::prelude::*;
//!
//! let pool = RecognitionPool::new(PoolConfig::default(), Arc::new(MyEngineFactory))?;
//! pool.initialize().await?;
//!
//! let handle = pool.recognize(ImagePayload::from_base64(&encoded)?, SubmitOptions::new())?;
//! match handle.await {
//!     Ok(output) => println!("{}", output.text()),
//!     Err(e) => eprintln!("recognition failed: {e}"),
//! }
//!
//! pool.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod recognizer;
pub mod task;
pub mod telemetry;
pub mod testing;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{PoolConfig, RetryPlacement};
    pub use crate::error::{PoolError, TaskError};
    pub use crate::pool::{PoolMetrics, PoolStatus, RecognitionPool};
    pub use crate::recognizer::{
        ImagePayload, RecognitionOutput, Recognizer, RecognizerError, RecognizerFactory,
        TextRegion,
    };
    pub use crate::task::{Priority, SubmitOptions, TaskHandle, TaskKind};
    pub use crate::worker::{WorkerSnapshot, WorkerStatus};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}

pub use config::{PoolConfig, RetryPlacement};
pub use error::{AttemptError, PoolError, TaskError};
pub use pool::{PoolMetrics, PoolStatus, RecognitionPool};
pub use recognizer::{
    BoundingBox, ImagePayload, RecognitionOutput, Recognizer, RecognizerError, RecognizerFactory,
    TextRegion,
};
pub use task::{Priority, SubmitOptions, TaskHandle, TaskId, TaskKind, TaskResult};
pub use worker::{WorkerSnapshot, WorkerStats, WorkerStatus};
