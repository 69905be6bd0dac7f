//! Dispatch, execution and retry
//!
//! A dispatch pass assigns queued tasks to idle workers, head first. Each
//! assignment spawns one attempt that races the recognizer call against the
//! task deadline. The attempt's outcome is applied back under the scheduler
//! lock, where it either settles the task or requeues it for another try.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::inner::PoolInner;
use crate::config::RetryPlacement;
use crate::error::{AttemptError, TaskError};
use crate::recognizer::{ImagePayload, RecognitionOutput};
use crate::task::{TaskId, TaskKind};
use crate::worker::AttemptContext;

/// Everything an attempt needs once it leaves the scheduler lock
struct Attempt {
    worker_id: Uuid,
    task_id: TaskId,
    kind: TaskKind,
    payload: ImagePayload,
    timeout: Duration,
    ctx: AttemptContext,
}

impl PoolInner {
    /// Assign queued tasks to idle workers
    ///
    /// If tasks remain and no worker is free, one new worker is requested
    /// (within `max_workers`); the pass is repeated once it is ready.
    pub(crate) fn dispatch(self: &Arc<Self>) {
        let mut attempts = Vec::new();

        let grow = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_running() || state.queue.is_empty() {
                return;
            }

            while let Some(worker_id) = state.idle_worker() {
                let Some(task) = state.queue.dequeue_head() else {
                    break;
                };
                let Some(worker) = state.workers.get_mut(&worker_id) else {
                    break;
                };

                debug!(
                    %worker_id,
                    task_id = %task.id,
                    kind = %task.kind,
                    priority = ?task.priority,
                    attempt = task.attempts(),
                    queued_for = ?task.waited(),
                    "Dispatching task"
                );

                let (task_id, kind, payload, timeout) =
                    (task.id, task.kind, task.payload.clone(), task.timeout);
                let ctx = worker.assign(task);
                attempts.push(Attempt {
                    worker_id,
                    task_id,
                    kind,
                    payload,
                    timeout,
                    ctx,
                });
            }

            !state.queue.is_empty() && state.reserve_worker(self.config.max_workers)
        };

        for attempt in attempts {
            tokio::spawn(Arc::clone(self).run_attempt(attempt));
        }

        if grow {
            self.spawn_worker_creation("dispatch");
        }
    }

    async fn run_attempt(self: Arc<Self>, attempt: Attempt) {
        let Attempt {
            worker_id,
            task_id,
            kind,
            payload,
            timeout,
            ctx: AttemptContext { recognizer, cancel },
        } = attempt;

        let operation = async {
            match kind {
                TaskKind::Recognize => recognizer
                    .recognize(&payload, &cancel)
                    .await
                    .map(RecognitionOutput::Text),
                TaskKind::Detect => recognizer
                    .detect(&payload, &cancel)
                    .await
                    .map(RecognitionOutput::Regions),
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(timeout, operation) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(AttemptError::Operation(e)),
                Err(_) => Err(AttemptError::Timeout(timeout)),
            },
        };

        // The operation future is already dropped; also stop any work the
        // recognizer handed off elsewhere.
        if matches!(outcome, Err(AttemptError::Timeout(_))) {
            cancel.cancel();
        }

        self.complete_attempt(worker_id, task_id, outcome);
    }

    /// Apply an attempt's outcome, then run another dispatch pass
    fn complete_attempt(
        self: &Arc<Self>,
        worker_id: Uuid,
        task_id: TaskId,
        outcome: Result<RecognitionOutput, AttemptError>,
    ) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(worker) = state.workers.get_mut(&worker_id) else {
                debug!(%worker_id, %task_id, "Worker gone, discarding attempt outcome");
                return;
            };
            let Some(assignment) = worker.finish(task_id) else {
                debug!(%worker_id, %task_id, "Task reassigned, discarding attempt outcome");
                return;
            };

            let elapsed = assignment.started.elapsed();
            let mut task = assignment.task;

            match outcome {
                Ok(output) => {
                    worker.stats.record_success(elapsed);
                    state.completed_count += 1;
                    state.total_task_time += elapsed;
                    debug!(%worker_id, %task_id, ?elapsed, "Task completed");
                    task.settle(Ok(output));
                }
                Err(error) => {
                    let message = error.to_string();
                    if worker.record_failure(message.clone(), self.config.unhealthy_threshold) {
                        warn!(
                            %worker_id,
                            error_count = worker.stats.error_count,
                            "Worker quarantined"
                        );
                    }

                    let retryable = match &error {
                        AttemptError::Operation(e) => e.retryable,
                        AttemptError::Timeout(_) | AttemptError::Cancelled => true,
                    };

                    if !state.is_running() {
                        task.settle(Err(TaskError::ShuttingDown));
                    } else if retryable && task.can_retry() {
                        task.prepare_retry();
                        warn!(
                            %worker_id,
                            %task_id,
                            retry = task.retry_count,
                            max_retries = task.max_retries,
                            error = %message,
                            "Task attempt failed, retrying"
                        );
                        match self.config.retry_placement {
                            RetryPlacement::Front => state.queue.enqueue_front(task),
                            RetryPlacement::ByPriority => state.queue.enqueue(task),
                        }
                    } else {
                        state.failed_count += 1;
                        error!(
                            %worker_id,
                            %task_id,
                            attempts = task.attempts(),
                            error = %message,
                            "Task failed"
                        );
                        let attempts = task.attempts();
                        task.settle(Err(TaskError::ExhaustedRetries {
                            attempts,
                            last_error: message,
                        }));
                    }
                }
            }
        }

        self.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::RecognitionPool;
    use crate::task::{Priority, SubmitOptions, TaskHandle};
    use crate::testing::{Behavior, ScriptedRecognizerFactory};

    async fn single_worker_pool(
        factory: &ScriptedRecognizerFactory,
        placement: RetryPlacement,
    ) -> RecognitionPool {
        let config = PoolConfig::default()
            .with_max_workers(1)
            .with_retry_placement(placement);
        let pool = RecognitionPool::new(config, Arc::new(factory.clone())).unwrap();
        pool.initialize().await.unwrap();
        pool
    }

    fn submit(pool: &RecognitionPool, text: &str, priority: Priority) -> TaskHandle {
        pool.recognize(
            ImagePayload::new(text.as_bytes().to_vec()),
            SubmitOptions::new().with_priority(priority),
        )
        .unwrap()
    }

    async fn completion_order(handles: Vec<TaskHandle>) -> Vec<String> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let waiters = handles.into_iter().map(|handle| {
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                if let Ok(output) = handle.await {
                    order.lock().push(output.text());
                }
            })
        });
        join_all(waiters).await;
        let order = order.lock().clone();
        order
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_goes_to_front() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_behavior(Behavior::echo_after(Duration::from_millis(100)));
        factory.push_behavior(Behavior::fail("transient"));
        let pool = single_worker_pool(&factory, RetryPlacement::Front).await;

        let low = submit(&pool, "low", Priority::Low);
        let urgent = submit(&pool, "urgent", Priority::Urgent);

        assert_eq!(completion_order(vec![low, urgent]).await, vec!["low", "urgent"]);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_by_priority() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_behavior(Behavior::echo_after(Duration::from_millis(100)));
        factory.push_behavior(Behavior::fail("transient"));
        let pool = single_worker_pool(&factory, RetryPlacement::ByPriority).await;

        // Boosted to Normal on retry, still behind Urgent
        let low = submit(&pool, "low", Priority::Low);
        let urgent = submit(&pool, "urgent", Priority::Urgent);

        assert_eq!(completion_order(vec![low, urgent]).await, vec!["urgent", "low"]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_first_attempt() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_behavior(Behavior::FailPermanently {
            message: "unsupported image format".into(),
        });
        let pool = single_worker_pool(&factory, RetryPlacement::Front).await;

        let result = submit(&pool, "x", Priority::Normal).await;
        assert_eq!(
            result,
            Err(TaskError::ExhaustedRetries {
                attempts: 1,
                last_error: "recognizer operation failed: unsupported image format".into(),
            })
        );
        assert_eq!(factory.calls(), 1);
        assert_eq!(pool.metrics().failed_tasks, 1);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_exhausted() {
        let factory = ScriptedRecognizerFactory::new();
        factory.set_behavior(Behavior::Hang);
        let pool = single_worker_pool(&factory, RetryPlacement::Front).await;

        let started = tokio::time::Instant::now();
        let result = pool
            .recognize(
                ImagePayload::new(b"slow".to_vec()),
                SubmitOptions::new().with_timeout(Duration::from_secs(1)),
            )
            .unwrap()
            .await;

        assert_eq!(
            result,
            Err(TaskError::ExhaustedRetries {
                attempts: 3,
                last_error: "task timed out after 1s".into(),
            })
        );
        assert_eq!(factory.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_outcome_is_discarded() {
        let factory = ScriptedRecognizerFactory::new();
        let pool = single_worker_pool(&factory, RetryPlacement::Front).await;
        let inner = Arc::clone(&pool.inner);

        let worker_id = inner.state.lock().idle_worker().unwrap();
        inner.complete_attempt(worker_id, TaskId(42), Ok(RecognitionOutput::Text("late".into())));

        let metrics = pool.metrics();
        assert_eq!(metrics.completed_tasks, 0);
        assert_eq!(metrics.idle_workers, 1);
        pool.shutdown().await;
    }
}
