//! Auto-scaling between `min_workers` and `max_workers`

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::inner::PoolInner;
use super::lifecycle::{detach_worker, terminate_recognizer};
use crate::worker::WorkerStatus;

/// Inputs to a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScaleInput {
    pub queued: usize,
    pub idle: usize,
    pub total: usize,
    pub pending: usize,
    pub min_workers: usize,
    pub max_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScaleDecision {
    Hold,
    /// Create exactly one worker
    Up,
    /// Remove this many idle workers
    Down(usize),
}

impl ScaleDecision {
    /// Grow by one under queue pressure; shrink when idle workers exceed
    /// half the floor by more than one
    pub fn evaluate(input: ScaleInput) -> Self {
        if input.queued > 0 && input.idle == 0 && input.total + input.pending < input.max_workers {
            return Self::Up;
        }

        let reserve = input.min_workers.div_ceil(2);
        let excess = input.idle.saturating_sub(reserve);
        if excess > 1 && input.total > input.min_workers {
            let count = (excess - 1).min(input.total - input.min_workers);
            return Self::Down(count);
        }

        Self::Hold
    }
}

impl PoolInner {
    /// One auto-scale pass
    pub(crate) async fn autoscale(self: &Arc<Self>) {
        let (decision, removed) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_running() {
                return;
            }

            let decision = ScaleDecision::evaluate(ScaleInput {
                queued: state.queue.len(),
                idle: state.count(WorkerStatus::Idle),
                total: state.workers.len(),
                pending: state.pending_workers,
                min_workers: self.config.min_workers,
                max_workers: self.config.max_workers,
            });

            let removed: Vec<_> = match decision {
                ScaleDecision::Up => {
                    state.pending_workers += 1;
                    Vec::new()
                }
                ScaleDecision::Down(count) => {
                    let victims: Vec<Uuid> = state
                        .idle_workers_oldest_first()
                        .into_iter()
                        .take(count)
                        .collect();
                    victims
                        .into_iter()
                        .filter_map(|id| detach_worker(state, id).map(|r| (id, r)))
                        .collect()
                }
                ScaleDecision::Hold => Vec::new(),
            };
            (decision, removed)
        };

        match decision {
            ScaleDecision::Up => {
                info!("Scaling up: queued tasks with no idle worker");
                self.spawn_worker_creation("scale_up");
            }
            ScaleDecision::Down(_) => {
                info!(count = removed.len(), "Scaling down idle workers");
                for (worker_id, recognizer) in removed {
                    terminate_recognizer(worker_id, recognizer).await;
                }
            }
            ScaleDecision::Hold => {}
        }
    }
}
