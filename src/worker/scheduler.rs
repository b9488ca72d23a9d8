//! Job scheduler — registry of in-flight executions.
//!
//! The Scheduler provides:
//! - `submit()` — run an itinerary on the bounded pool and track its handle
//! - `cancel_and_requeue()` — supersede an in-flight execution after an edit
//! - `resume_unfinished()` — startup recovery of `Queued`/`Processing` work
//! - Wait estimates through the shared `WaitEstimator`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{DatabaseError, JobError};
use crate::itinerary::Itinerary;
use crate::store::JobStore;
use crate::worker::estimator::WaitEstimator;
use crate::worker::pool::{TaskHandle, WorkerPool};
use crate::worker::worker::{SimulatedStopWork, StopProcessor, Worker, WorkerDeps};

/// Schedules itinerary execution and tracks one handle per itinerary.
pub struct Scheduler {
    pool: WorkerPool,
    deps: WorkerDeps,
    /// Itinerary id → handle of its most recent submission.
    registry: Arc<DashMap<Uuid, TaskHandle>>,
    estimator: WaitEstimator,
}

impl Scheduler {
    /// Create a scheduler whose stops take `config.stop_duration` each.
    pub fn new(config: &SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let processor = Arc::new(SimulatedStopWork::new(config.stop_duration));
        Self::with_processor(config, store, processor)
    }

    pub fn with_processor(
        config: &SchedulerConfig,
        store: Arc<dyn JobStore>,
        processor: Arc<dyn StopProcessor>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(config),
            estimator: WaitEstimator::new(Arc::clone(&store), config.stop_duration),
            deps: WorkerDeps { store, processor },
            registry: Arc::new(DashMap::new()),
        }
    }

    /// Request execution of `job_id`. Returns immediately.
    ///
    /// Fails with `Overloaded` when every slot and queue place is taken. The
    /// new handle replaces any handle already tracked for the id; it is
    /// removed again once its execution ends, but only if it is still the
    /// tracked one.
    pub fn submit(&self, job_id: Uuid) -> Result<TaskHandle, JobError> {
        let deps = self.deps.clone();
        let handle = self
            .pool
            .spawn(job_id, move |token| Worker::new(job_id, deps).run(token))?;

        if let Some(previous) = self.registry.insert(job_id, handle.clone()) {
            tracing::debug!(
                job_id = %job_id,
                previous = previous.id(),
                "Replaced tracked handle"
            );
        }

        let registry = Arc::clone(&self.registry);
        let observed = handle.clone();
        tokio::spawn(async move {
            let outcome = observed.wait().await;
            let job_id = observed.job_id();
            let removed = registry
                .remove_if(&job_id, |_, tracked| *tracked == observed)
                .is_some();
            match outcome {
                Some(outcome) => tracing::info!(
                    job_id = %job_id,
                    handle = observed.id(),
                    %outcome,
                    removed,
                    "Execution finished"
                ),
                None => tracing::warn!(
                    job_id = %job_id,
                    handle = observed.id(),
                    removed,
                    "Execution ended without an outcome"
                ),
            }
        });

        tracing::info!(job_id = %job_id, handle = handle.id(), "Itinerary submitted");
        Ok(handle)
    }

    /// Cancel any in-flight execution of `itinerary` and persist it as `Queued`.
    ///
    /// Does not resubmit. Cancellation is cooperative, so a running worker
    /// stops at its next checkpoint without writing its own status.
    pub async fn cancel_and_requeue(
        &self,
        mut itinerary: Itinerary,
    ) -> Result<Itinerary, DatabaseError> {
        match self.registry.remove(&itinerary.id) {
            Some((_, handle)) => {
                let cancelled = handle.cancel();
                tracing::info!(
                    job_id = %itinerary.id,
                    handle = handle.id(),
                    cancelled,
                    "Cancellation requested"
                );
            }
            None => tracing::debug!(job_id = %itinerary.id, "No tracked execution to cancel"),
        }

        itinerary.requeue();
        let saved = self.deps.store.save(&itinerary).await?;
        tracing::info!(job_id = %saved.id, "Itinerary requeued");
        Ok(saved)
    }

    /// Requeue and resubmit everything left `Queued` or `Processing`.
    ///
    /// Returns how many were submitted. Stops at the first `Overloaded`.
    pub async fn resume_unfinished(&self) -> Result<usize, DatabaseError> {
        let unfinished = self.deps.store.list_unfinished().await?;
        let total = unfinished.len();
        let mut submitted = 0;

        for itinerary in unfinished {
            let requeued = self.cancel_and_requeue(itinerary).await?;
            match self.submit(requeued.id) {
                Ok(_) => submitted += 1,
                Err(e) => {
                    tracing::warn!(
                        job_id = %requeued.id,
                        error = %e,
                        remaining = total - submitted,
                        "Could not resume all unfinished itineraries"
                    );
                    break;
                }
            }
        }

        if total > 0 {
            tracing::info!(submitted, total, "Resumed unfinished itineraries");
        }
        Ok(submitted)
    }

    pub async fn estimate_seconds(
        &self,
        job_id: Uuid,
        reference: Option<DateTime<Utc>>,
    ) -> Result<u64, DatabaseError> {
        self.estimator.estimate_seconds(job_id, reference).await
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn is_tracked(&self, job_id: Uuid) -> bool {
        self.registry.contains_key(&job_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }

    /// The currently tracked handle for `job_id`, if any.
    pub fn handle(&self, job_id: Uuid) -> Option<TaskHandle> {
        self.registry.get(&job_id).map(|entry| entry.value().clone())
    }
}
