//! Recognition pool
//!
//! This module provides:
//! - [`RecognitionPool`] - lifecycle, submission and introspection
//! - [`PoolMetrics`] / [`PoolStatus`] - point-in-time pool view
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecognitionPool                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Dispatch   │  │ Health check│  │     Auto-scale      │  │
//! │  │  (100ms)    │  │   (30s)     │  │       (5s)          │  │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘  │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        SchedulerState (one mutex)                   │    │
//! │  │  priority queue · worker map · counters             │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │   Attempts (one spawned task per busy worker)       │    │
//! │  │   recognizer call ⟷ timeout ⟷ cancellation token    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Submissions and attempt completions also trigger a dispatch pass, so the
//! dispatch loop only picks up work that arrived while no worker was free.

mod dispatch;
mod health;
mod inner;
mod lifecycle;
mod metrics;
mod recognition_pool;
mod scaling;

pub use metrics::{PoolMetrics, PoolStatus};
pub use recognition_pool::RecognitionPool;
