//! Per-itinerary worker execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::itinerary::{Itinerary, Status, Stop};
use crate::store::JobStore;

/// Work performed for a single stop.
#[async_trait]
pub trait StopProcessor: Send + Sync {
    async fn process(&self, itinerary: &Itinerary, stop: &Stop) -> Result<(), JobError>;
}

/// Placeholder per-stop work: waits a fixed duration.
#[derive(Debug, Clone)]
pub struct SimulatedStopWork {
    duration: Duration,
}

impl SimulatedStopWork {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl StopProcessor for SimulatedStopWork {
    async fn process(&self, itinerary: &Itinerary, stop: &Stop) -> Result<(), JobError> {
        tracing::debug!(
            job_id = %itinerary.id,
            stop = stop.order_index,
            city = %stop.place.city,
            duration_ms = self.duration.as_millis() as u64,
            "Simulating stop work"
        );
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// How one execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Every stop processed; `Completed` persisted.
    Completed,
    /// A stop failed or panicked; `Failed` persisted when possible.
    Failed { reason: String },
    /// Cancellation observed, or the stored status changed underneath.
    Cancelled,
    /// The itinerary did not exist when the worker started.
    NotFound,
    /// The itinerary was already `Completed` or `Failed`.
    Skipped { status: Status },
    /// The execution panicked outside stop processing. Set by the pool.
    Panicked,
}

impl std::fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::NotFound => write!(f, "not found"),
            Self::Skipped { status } => write!(f, "skipped (status {status})"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub processor: Arc<dyn StopProcessor>,
}

/// Worker that executes a single itinerary.
///
/// Only the status is ever written back, through
/// [`JobStore::update_status`], so an edit saved while the worker runs is
/// never overwritten.
pub struct Worker {
    job_id: Uuid,
    deps: WorkerDeps,
}

enum Walk {
    Finished,
    Interrupted { before_stop: u32 },
}

impl Worker {
    pub fn new(job_id: Uuid, deps: WorkerDeps) -> Self {
        Self { job_id, deps }
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        &self.deps.store
    }

    /// Run the itinerary to completion, failure or cancellation.
    ///
    /// Never returns an error: failures become a persisted `Failed` status
    /// and a `Failed` outcome.
    pub async fn run(self, cancel: CancellationToken) -> WorkerOutcome {
        tracing::info!(job_id = %self.job_id, "Worker started");

        let mut itinerary = match self.store().find_with_stops_and_places(self.job_id).await {
            Ok(Some(itinerary)) => itinerary,
            Ok(None) => {
                tracing::error!(job_id = %self.job_id, "Worker failed: itinerary not found");
                return WorkerOutcome::NotFound;
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Worker failed to load itinerary");
                return WorkerOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if itinerary.status.is_terminal() {
            tracing::warn!(
                job_id = %self.job_id,
                status = %itinerary.status,
                "Itinerary already finished, not starting"
            );
            return WorkerOutcome::Skipped {
                status: itinerary.status,
            };
        }

        if cancel.is_cancelled() {
            tracing::warn!(job_id = %self.job_id, "Cancelled before processing started");
            return WorkerOutcome::Cancelled;
        }

        if itinerary.status == Status::Processing {
            tracing::warn!(job_id = %self.job_id, "Resuming itinerary left in PROCESSING");
        }

        match self.set_status(&mut itinerary, Status::Processing).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %self.job_id, "Status changed before start, giving up");
                return WorkerOutcome::Cancelled;
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to persist PROCESSING");
                return WorkerOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        // A requeue may have landed just before the swap above.
        if cancel.is_cancelled() {
            self.hand_back().await;
            return WorkerOutcome::Cancelled;
        }

        tracing::info!(
            job_id = %self.job_id,
            stops = itinerary.stops.len(),
            "Itinerary set to PROCESSING"
        );

        match self.walk_stops(&itinerary, &cancel).await {
            Ok(Walk::Finished) if !cancel.is_cancelled() => {
                self.mark_completed(&mut itinerary).await
            }
            Ok(Walk::Finished) => {
                tracing::warn!(job_id = %self.job_id, "Cancelled after the last stop");
                WorkerOutcome::Cancelled
            }
            Ok(Walk::Interrupted { before_stop }) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    before_stop,
                    "Worker interrupted, stopping execution"
                );
                WorkerOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Stop processing failed");
                self.mark_failed(&mut itinerary, e.to_string()).await
            }
        }
    }

    async fn walk_stops(
        &self,
        itinerary: &Itinerary,
        cancel: &CancellationToken,
    ) -> Result<Walk, JobError> {
        let mut stops: Vec<&Stop> = itinerary.stops.iter().collect();
        stops.sort_by_key(|s| s.order_index);

        for stop in stops {
            if cancel.is_cancelled() {
                return Ok(Walk::Interrupted {
                    before_stop: stop.order_index,
                });
            }
            tracing::info!(
                job_id = %self.job_id,
                stop = stop.order_index,
                city = %stop.place.city,
                "Processing stop"
            );
            let processed = AssertUnwindSafe(self.deps.processor.process(itinerary, stop))
                .catch_unwind()
                .await;
            match processed {
                Ok(result) => result?,
                Err(_) => {
                    return Err(JobError::StopProcessing {
                        id: itinerary.id,
                        order_index: stop.order_index,
                        reason: "stop processing panicked".to_string(),
                    });
                }
            }
        }
        Ok(Walk::Finished)
    }

    /// Move to `target` in memory and in the store.
    ///
    /// `Ok(false)` when the stored status no longer matches ours.
    async fn set_status(
        &self,
        itinerary: &mut Itinerary,
        target: Status,
    ) -> Result<bool, Error> {
        let from = itinerary.status;
        if from != target {
            itinerary.transition_to(target)?;
        }
        let swapped = self.store().update_status(itinerary.id, from, target).await?;
        if !swapped {
            itinerary.status = from;
        }
        Ok(swapped)
    }

    /// Undo our PROCESSING write after a late cancellation.
    async fn hand_back(&self) {
        match self
            .store()
            .update_status(self.job_id, Status::Processing, Status::Queued)
            .await
        {
            Ok(reverted) => {
                tracing::warn!(job_id = %self.job_id, reverted, "Cancelled right after start")
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to hand back to QUEUED")
            }
        }
    }

    async fn mark_completed(&self, itinerary: &mut Itinerary) -> WorkerOutcome {
        match self.set_status(itinerary, Status::Completed).await {
            Ok(true) => {
                tracing::info!(job_id = %self.job_id, "Itinerary COMPLETED");
                WorkerOutcome::Completed
            }
            Ok(false) => {
                tracing::warn!(job_id = %self.job_id, "Requeued before completion was recorded");
                WorkerOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to persist COMPLETED");
                WorkerOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn mark_failed(&self, itinerary: &mut Itinerary, reason: String) -> WorkerOutcome {
        match self.set_status(itinerary, Status::Failed).await {
            Ok(true) => tracing::warn!(job_id = %self.job_id, "Itinerary marked FAILED"),
            Ok(false) => {
                tracing::warn!(job_id = %self.job_id, "Requeued before failure was recorded")
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to persist FAILED")
            }
        }
        WorkerOutcome::Failed { reason }
    }
}
