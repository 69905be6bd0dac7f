//! Caller-facing completion handle

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::definition::{TaskId, TaskKind, TaskResult};
use crate::error::TaskError;

/// Resolves once the pool settles the task
///
/// Dropping the handle does not cancel the task; the result is discarded.
///
/// # Example
///
/// ```ignore
/// let handle = pool.recognize(payload, SubmitOptions::default())?;
/// let text = handle.await?.text();
/// ```
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, kind: TaskKind, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, kind, rx }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(TaskError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::RecognitionOutput;

    #[tokio::test]
    async fn test_handle_resolves_with_result() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(TaskId(1), TaskKind::Detect, rx);
        assert_eq!(handle.id(), TaskId(1));
        assert_eq!(handle.kind(), TaskKind::Detect);

        tx.send(Ok(RecognitionOutput::Regions(vec![]))).unwrap();
        assert_eq!(handle.await, Ok(RecognitionOutput::Regions(vec![])));
    }

    #[tokio::test]
    async fn test_dropped_sender_yields_abandoned() {
        let (tx, rx) = oneshot::channel::<TaskResult>();
        let handle = TaskHandle::new(TaskId(2), TaskKind::Recognize, rx);
        drop(tx);
        assert_eq!(handle.await, Err(TaskError::Abandoned));
    }
}
