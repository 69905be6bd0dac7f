//! Tasks and their scheduling order
//!
//! - [`TaskHandle`] - caller-facing future settled with the task's result
//! - [`Priority`], [`TaskKind`], [`SubmitOptions`] - submission parameters
//! - `TaskQueue` - descending-priority, FIFO-within-priority pending list

mod definition;
mod handle;
mod queue;

#[cfg(test)]
pub(crate) use definition::test_task;
pub(crate) use definition::Task;
pub use definition::{Priority, SubmitOptions, TaskId, TaskKind, TaskResult};
pub use handle::TaskHandle;
pub(crate) use queue::TaskQueue;
