//! In-process `JobStore` backed by hash maps.
//!
//! Used by tests and by embedders that do not need durability. Every save
//! also appends the saved status to a per-itinerary history so callers can
//! verify the sequence of persisted transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::itinerary::{Itinerary, Place, Status};
use crate::store::traits::{JobStore, PlaceDirectory};

#[derive(Default)]
struct Inner {
    itineraries: HashMap<Uuid, Itinerary>,
    history: HashMap<Uuid, Vec<Status>>,
}

/// Hash-map backed itinerary and place store.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
    places: RwLock<HashMap<i64, Place>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the place directory.
    pub async fn insert_place(&self, place: Place) {
        self.places.write().await.insert(place.id, place);
    }

    /// Every status persisted for `id`, in save order.
    pub async fn status_history(&self, id: Uuid) -> Vec<Status> {
        self.inner
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of stored itineraries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.itineraries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Itinerary>, DatabaseError> {
        Ok(self.inner.read().await.itineraries.get(&id).cloned())
    }

    async fn find_with_stops_and_places(
        &self,
        id: Uuid,
    ) -> Result<Option<Itinerary>, DatabaseError> {
        self.find_by_id(id).await
    }

    async fn save(&self, itinerary: &Itinerary) -> Result<Itinerary, DatabaseError> {
        let mut saved = itinerary.clone();
        saved.stops.sort_by_key(|s| s.order_index);

        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.itineraries.get(&saved.id) {
            saved.created_at = existing.created_at;
            saved.updated_at = Some(Utc::now());
        }
        inner
            .history
            .entry(saved.id)
            .or_default()
            .push(saved.status);
        inner.itineraries.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: Status,
        to: Status,
    ) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.write().await;
        let Inner {
            itineraries,
            history,
        } = &mut *inner;
        let Some(itinerary) = itineraries.get_mut(&id) else {
            return Ok(false);
        };
        if itinerary.status != from {
            return Ok(false);
        }
        itinerary.status = to;
        itinerary.updated_at = Some(Utc::now());
        history.entry(id).or_default().push(to);
        Ok(true)
    }

    async fn count_pending_stops(
        &self,
        id: Uuid,
        reference: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let inner = self.inner.read().await;
        let Some(own) = inner.itineraries.get(&id) else {
            return Ok(0);
        };

        let earlier: usize = inner
            .itineraries
            .values()
            .filter(|it| it.id != id && it.reference_time() < reference)
            .map(|it| it.stops.len())
            .sum();

        Ok((own.stops.len() + earlier) as u64)
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        status: Option<Status>,
    ) -> Result<Vec<Itinerary>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Itinerary> = inner
            .itineraries
            .values()
            .filter(|it| it.session_id == session_id)
            .filter(|it| status.is_none_or(|s| it.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_unfinished(&self) -> Result<Vec<Itinerary>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Itinerary> = inner
            .itineraries
            .values()
            .filter(|it| !it.status.is_terminal())
            .cloned()
            .collect();
        found.sort_by_key(|it| it.reference_time());
        Ok(found)
    }
}

#[async_trait]
impl PlaceDirectory for MemoryJobStore {
    async fn find_place(&self, id: i64) -> Result<Option<Place>, DatabaseError> {
        Ok(self.places.read().await.get(&id).cloned())
    }
}
