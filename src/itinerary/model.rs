//! Itinerary, stop and place types.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{JobError, ValidationError};
use crate::itinerary::status::Status;

/// Read-only geographic reference a stop points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: i64,
    pub country: String,
    pub region: Option<String>,
    pub province: Option<String>,
    pub city: String,
}

impl Place {
    pub fn new(id: i64, country: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            id,
            country: country.into(),
            region: None,
            province: None,
            city: city.into(),
        }
    }
}

/// One ordered waypoint of an itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    /// Zero-based position, unique within the itinerary.
    pub order_index: u32,
    pub is_current_stop: bool,
    pub place: Place,
}

impl Stop {
    pub fn new(order_index: u32, place: Place) -> Self {
        Self {
            order_index,
            is_current_stop: false,
            place,
        }
    }

    pub fn current(mut self) -> Self {
        self.is_current_stop = true;
        self
    }
}

/// A schedulable itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    pub id: Uuid,
    pub title: String,
    pub session_id: String,
    pub status: Status,
    /// Kept sorted by `order_index`.
    pub stops: Vec<Stop>,
    pub created_at: DateTime<Utc>,
    /// `None` until the first save after creation.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Itinerary {
    /// Create a new queued itinerary with no stops.
    pub fn new(session_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            session_id: session_id.into(),
            status: Status::Queued,
            stops: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Builder-style stop replacement.
    pub fn with_stops(mut self, stops: Vec<Stop>) -> Self {
        self.set_stops(stops);
        self
    }

    /// Replace the stop list, sorting by order index.
    pub fn set_stops(&mut self, mut stops: Vec<Stop>) {
        stops.sort_by_key(|s| s.order_index);
        self.stops = stops;
    }

    /// Move to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, target: Status) -> Result<(), JobError> {
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Reset to `Queued`. Always allowed.
    pub fn requeue(&mut self) {
        self.status = Status::Queued;
    }

    /// Timestamp used to order this itinerary in the backlog.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn current_stop(&self) -> Option<&Stop> {
        self.stops.iter().find(|s| s.is_current_stop)
    }

    /// Move the current-stop flag one stop forward.
    ///
    /// With no current stop the first stop becomes current.
    pub fn advance_current_stop(&mut self) -> Result<&Stop, ValidationError> {
        let next = match self.stops.iter().position(|s| s.is_current_stop) {
            Some(idx) if idx + 1 < self.stops.len() => idx + 1,
            Some(_) => return Err(ValidationError::NoNextStop { id: self.id }),
            None if !self.stops.is_empty() => 0,
            None => return Err(ValidationError::NoNextStop { id: self.id }),
        };
        for stop in &mut self.stops {
            stop.is_current_stop = false;
        }
        self.stops[next].is_current_stop = true;
        Ok(&self.stops[next])
    }
}

/// Caller-supplied stop, referencing a place by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopDraft {
    pub place_id: i64,
    pub order_index: u32,
    #[serde(default)]
    pub is_current_stop: bool,
}

/// Caller-supplied itinerary contents for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItineraryDraft {
    pub title: String,
    pub stops: Vec<StopDraft>,
}

impl ItineraryDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::BlankTitle);
        }

        let current = self.stops.iter().filter(|s| s.is_current_stop).count();
        if current > 1 {
            return Err(ValidationError::MultipleCurrentStops { count: current });
        }

        let mut seen = HashSet::new();
        for stop in &self.stops {
            if !seen.insert(stop.order_index) {
                return Err(ValidationError::DuplicateOrderIndex {
                    order_index: stop.order_index,
                });
            }
        }
        Ok(())
    }
}
