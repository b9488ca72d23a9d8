//! Persistence traits consumed by the scheduler, worker and planner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::itinerary::{Itinerary, Place, Status};

/// Durable record of itineraries and their stops.
///
/// Implementations guarantee atomic single-itinerary reads and writes; no
/// cross-itinerary transactions are required.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up an itinerary.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Itinerary>, DatabaseError>;

    /// Look up an itinerary with its ordered stops and their places.
    async fn find_with_stops_and_places(
        &self,
        id: Uuid,
    ) -> Result<Option<Itinerary>, DatabaseError>;

    /// Insert or replace an itinerary (stops included), stamping
    /// `updated_at` on every save after the first.
    async fn save(&self, itinerary: &Itinerary) -> Result<Itinerary, DatabaseError>;

    /// Compare-and-set on status alone: move `id` from `from` to `to` and
    /// stamp `updated_at`, leaving title and stops untouched. Returns `false`
    /// when the itinerary is missing or its status is no longer `from`.
    async fn update_status(
        &self,
        id: Uuid,
        from: Status,
        to: Status,
    ) -> Result<bool, DatabaseError>;

    /// Backlog proxy: stops of `id` itself plus stops of every other
    /// itinerary whose `updated_at` (or `created_at` when never updated) is
    /// strictly earlier than `reference`. Zero when `id` is unknown.
    async fn count_pending_stops(
        &self,
        id: Uuid,
        reference: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    /// Itineraries of a session, newest first, optionally filtered by status.
    async fn list_by_session(
        &self,
        session_id: &str,
        status: Option<Status>,
    ) -> Result<Vec<Itinerary>, DatabaseError>;

    /// Itineraries left `Queued` or `Processing`, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Itinerary>, DatabaseError>;
}

/// Read-only geographic reference data.
#[async_trait]
pub trait PlaceDirectory: Send + Sync {
    async fn find_place(&self, id: i64) -> Result<Option<Place>, DatabaseError>;
}
