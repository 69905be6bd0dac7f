//! Workers: one exclusively owned recognizer plus scheduling and health state
//!
//! - `Worker` - internal record mutated only by the pool's scheduler
//! - [`WorkerSnapshot`] - point-in-time public view
//! - [`WorkerStats`] - per-worker counters

mod snapshot;
mod state;

pub(crate) use snapshot::mean;
pub use snapshot::{WorkerSnapshot, WorkerStats, WorkerStatus};
pub(crate) use state::{AttemptContext, Worker, WorkerState};
