//! Backlog-based wait estimate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::JobStore;

/// Converts the pending stop backlog into seconds.
///
/// Treats the backlog as if it ran serially, so the figure overestimates
/// whenever more than one slot is busy.
#[derive(Clone)]
pub struct WaitEstimator {
    store: Arc<dyn JobStore>,
    stop_duration: Duration,
}

impl WaitEstimator {
    pub fn new(store: Arc<dyn JobStore>, stop_duration: Duration) -> Self {
        Self {
            store,
            stop_duration,
        }
    }

    /// Estimated seconds until `job_id` is done.
    ///
    /// Without a `reference`, the itinerary's own last-modified (or created)
    /// time is used. Unknown itineraries estimate to 0.
    pub async fn estimate_seconds(
        &self,
        job_id: Uuid,
        reference: Option<DateTime<Utc>>,
    ) -> Result<u64, DatabaseError> {
        let reference = match reference {
            Some(reference) => reference,
            None => match self.store.find_by_id(job_id).await? {
                Some(itinerary) => itinerary.reference_time(),
                None => return Ok(0),
            },
        };

        let pending = self.store.count_pending_stops(job_id, reference).await?;
        let seconds = self.seconds_for(pending);
        tracing::debug!(job_id = %job_id, pending, seconds, "Wait estimated");
        Ok(seconds)
    }

    fn seconds_for(&self, pending_stops: u64) -> u64 {
        let millis = u128::from(pending_stops) * self.stop_duration.as_millis();
        u64::try_from(millis / 1000).unwrap_or(u64::MAX)
    }
}
