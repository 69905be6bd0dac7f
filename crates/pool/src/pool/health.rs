//! Health check: repair quarantined workers, evict idle ones, restore the floor

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::inner::PoolInner;
use super::lifecycle::{detach_worker, terminate_recognizer};

impl PoolInner {
    /// One health check pass
    pub(crate) async fn health_check(self: &Arc<Self>) {
        self.restart_unhealthy().await;
        self.evict_idle().await;
        self.replenish();
    }

    async fn restart_unhealthy(self: &Arc<Self>) {
        let unhealthy: Vec<Uuid> = {
            let state = self.state.lock();
            if !state.is_running() {
                return;
            }
            state
                .workers
                .values()
                .filter(|w| w.is_unhealthy())
                .map(|w| w.id)
                .collect()
        };

        if unhealthy.is_empty() {
            return;
        }
        info!(count = unhealthy.len(), "Restarting unhealthy workers");

        let results = join_all(unhealthy.iter().map(|&id| self.restart_worker(id))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, "Some worker restarts failed; capacity reduced");
        }
    }

    /// Remove workers idle longer than `idle_timeout`, never going below `min_workers`
    async fn evict_idle(&self) {
        let evicted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.is_running() {
                return;
            }

            let removable = state.workers.len().saturating_sub(self.config.min_workers);
            let expired: Vec<Uuid> = state
                .idle_workers_oldest_first()
                .into_iter()
                .filter(|id| {
                    state
                        .workers
                        .get(id)
                        .is_some_and(|w| w.idle_for() > self.config.idle_timeout)
                })
                .take(removable)
                .collect();

            expired
                .into_iter()
                .filter_map(|id| detach_worker(state, id).map(|r| (id, r)))
                .collect::<Vec<_>>()
        };

        for (worker_id, recognizer) in evicted {
            terminate_recognizer(worker_id, recognizer).await;
            info!(%worker_id, "Evicted idle worker");
        }
    }

    /// Start creating workers until `min_workers` is reached again
    ///
    /// Failed restarts shrink the pool; this brings it back to its floor.
    pub(crate) fn replenish(self: &Arc<Self>) {
        let missing = {
            let mut state = self.state.lock();
            if !state.is_running() {
                return;
            }
            let missing = self.config.min_workers.saturating_sub(state.capacity());
            for _ in 0..missing {
                state.pending_workers += 1;
            }
            missing
        };

        if missing > 0 {
            debug!(missing, "Replenishing workers to minimum");
        }
        for _ in 0..missing {
            self.spawn_worker_creation("replenish");
        }
    }
}
