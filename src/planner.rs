//! Itinerary planning operations.
//!
//! Composes the store, place directory and scheduler into the operations a
//! front end needs: create, edit, advance the current stop, read and list.
//! Every edit supersedes the in-flight execution and resubmits.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{JobError, Result, ValidationError};
use crate::itinerary::{Itinerary, ItineraryDraft, Status, Stop};
use crate::store::{JobStore, PlaceDirectory};
use crate::worker::Scheduler;

/// An itinerary together with its current wait estimate.
#[derive(Debug, Clone, Serialize)]
pub struct ItineraryView {
    #[serde(flatten)]
    pub itinerary: Itinerary,
    pub estimated_wait_seconds: u64,
}

pub struct Planner {
    store: Arc<dyn JobStore>,
    places: Arc<dyn PlaceDirectory>,
    scheduler: Arc<Scheduler>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn JobStore>,
        places: Arc<dyn PlaceDirectory>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            store,
            places,
            scheduler,
        }
    }

    /// Validate, persist as `Queued` and submit a new itinerary.
    pub async fn create(&self, session_id: &str, draft: ItineraryDraft) -> Result<ItineraryView> {
        require_session(session_id)?;
        draft.validate()?;
        let stops = self.resolve_stops(&draft).await?;

        let itinerary = Itinerary::new(session_id, draft.title).with_stops(stops);
        let saved = self.store.save(&itinerary).await?;
        self.scheduler.submit(saved.id)?;

        tracing::info!(job_id = %saved.id, stops = saved.stops.len(), "Itinerary created");
        self.view(saved).await
    }

    /// Replace title and stops, then supersede the running execution.
    pub async fn update(
        &self,
        session_id: &str,
        id: Uuid,
        draft: ItineraryDraft,
    ) -> Result<ItineraryView> {
        require_session(session_id)?;
        draft.validate()?;
        let mut itinerary = self.load_owned(session_id, id).await?;
        let stops = self.resolve_stops(&draft).await?;

        itinerary.title = draft.title;
        itinerary.set_stops(stops);
        self.requeue_and_submit(itinerary).await
    }

    /// Mark the stop after the current one as current, then resubmit.
    pub async fn advance_next_stop(&self, session_id: &str, id: Uuid) -> Result<ItineraryView> {
        require_session(session_id)?;
        let mut itinerary = self.load_owned(session_id, id).await?;
        let order_index = itinerary.advance_current_stop()?.order_index;
        tracing::info!(job_id = %id, order_index, "Advanced current stop");
        self.requeue_and_submit(itinerary).await
    }

    pub async fn get(&self, session_id: &str, id: Uuid) -> Result<ItineraryView> {
        require_session(session_id)?;
        let itinerary = self.load_owned(session_id, id).await?;
        self.view(itinerary).await
    }

    /// The session's itineraries, newest first.
    pub async fn list(&self, session_id: &str, status: Option<Status>) -> Result<Vec<ItineraryView>> {
        require_session(session_id)?;
        let itineraries = self.store.list_by_session(session_id, status).await?;
        let mut views = Vec::with_capacity(itineraries.len());
        for itinerary in itineraries {
            views.push(self.view(itinerary).await?);
        }
        Ok(views)
    }

    async fn requeue_and_submit(&self, itinerary: Itinerary) -> Result<ItineraryView> {
        let saved = self.scheduler.cancel_and_requeue(itinerary).await?;
        self.scheduler.submit(saved.id)?;
        self.view(saved).await
    }

    async fn load_owned(&self, session_id: &str, id: Uuid) -> Result<Itinerary> {
        match self.store.find_with_stops_and_places(id).await? {
            Some(itinerary) if itinerary.session_id == session_id => Ok(itinerary),
            Some(_) => {
                tracing::warn!(job_id = %id, "Itinerary requested from another session");
                Err(JobError::NotFound { id }.into())
            }
            None => Err(JobError::NotFound { id }.into()),
        }
    }

    async fn resolve_stops(&self, draft: &ItineraryDraft) -> Result<Vec<Stop>> {
        let mut stops = Vec::with_capacity(draft.stops.len());
        for stop in &draft.stops {
            let place = self
                .places
                .find_place(stop.place_id)
                .await?
                .ok_or(ValidationError::UnknownPlace {
                    place_id: stop.place_id,
                })?;
            stops.push(Stop {
                order_index: stop.order_index,
                is_current_stop: stop.is_current_stop,
                place,
            });
        }
        Ok(stops)
    }

    async fn view(&self, itinerary: Itinerary) -> Result<ItineraryView> {
        let estimated_wait_seconds = if itinerary.status.is_terminal() {
            0
        } else {
            self.scheduler
                .estimate_seconds(itinerary.id, Some(itinerary.reference_time()))
                .await?
        };
        Ok(ItineraryView {
            itinerary,
            estimated_wait_seconds,
        })
    }
}

fn require_session(session_id: &str) -> std::result::Result<(), ValidationError> {
    if session_id.trim().is_empty() {
        return Err(ValidationError::MissingSession);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::error::Error;
    use crate::itinerary::{Place, StopDraft};
    use crate::store::MemoryJobStore;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        scheduler: Arc<Scheduler>,
        planner: Planner,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        store.insert_place(Place::new(1, "Portugal", "Lisbon")).await;
        store.insert_place(Place::new(2, "Portugal", "Porto")).await;
        store.insert_place(Place::new(3, "Portugal", "Faro")).await;

        // Long stops keep executions in flight for the whole test.
        let config = SchedulerConfig {
            stop_duration: Duration::from_secs(2),
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(Scheduler::new(&config, store.clone()));
        let planner = Planner::new(store.clone(), store.clone(), Arc::clone(&scheduler));
        Fixture {
            store,
            scheduler,
            planner,
        }
    }

    fn draft(title: &str, place_ids: &[i64]) -> ItineraryDraft {
        ItineraryDraft {
            title: title.into(),
            stops: place_ids
                .iter()
                .enumerate()
                .map(|(i, &place_id)| StopDraft {
                    place_id,
                    order_index: i as u32,
                    is_current_stop: false,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_persists_submits_and_estimates() {
        let f = fixture().await;
        let view = f
            .planner
            .create("session-a", draft("Coast", &[1, 2]))
            .await
            .unwrap();

        assert_eq!(view.itinerary.status, Status::Queued);
        assert_eq!(view.itinerary.stops[1].place.city, "Porto");
        assert_eq!(view.estimated_wait_seconds, 4);
        assert!(f.scheduler.is_tracked(view.itinerary.id));
        assert!(f.store.find_by_id(view.itinerary.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_rejects_unknown_place() {
        let f = fixture().await;
        let err = f
            .planner
            .create("session-a", draft("Coast", &[1, 99]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownPlace { place_id: 99 })
        ));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn create_requires_session() {
        let f = fixture().await;
        let err = f.planner.create("  ", draft("Coast", &[1])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingSession)));
    }

    #[tokio::test]
    async fn other_sessions_see_not_found() {
        let f = fixture().await;
        let view = f.planner.create("owner", draft("Coast", &[1])).await.unwrap();
        let id = view.itinerary.id;

        let err = f.planner.get("intruder", id).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NotFound { .. })));
        let err = f
            .planner
            .update("intruder", id, draft("Mine now", &[2]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NotFound { .. })));
    }

    #[tokio::test]
    async fn update_supersedes_running_execution() {
        let f = fixture().await;
        let view = f.planner.create("s", draft("Coast", &[1])).await.unwrap();
        let id = view.itinerary.id;
        let original = f.scheduler.handle(id).unwrap();

        let updated = f
            .planner
            .update("s", id, draft("Longer coast", &[1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(updated.itinerary.title, "Longer coast");
        assert_eq!(updated.itinerary.stops.len(), 3);
        assert_eq!(updated.itinerary.status, Status::Queued);
        assert!(updated.itinerary.updated_at.is_some());
        assert!(original.is_cancelled());
        assert_ne!(f.scheduler.handle(id), Some(original));
    }

    #[tokio::test]
    async fn advance_walks_stops_until_last() {
        let f = fixture().await;
        let view = f.planner.create("s", draft("Coast", &[1, 2, 3])).await.unwrap();
        let id = view.itinerary.id;

        let first = f.planner.advance_next_stop("s", id).await.unwrap();
        assert_eq!(first.itinerary.current_stop().unwrap().order_index, 0);
        f.planner.advance_next_stop("s", id).await.unwrap();
        let last = f.planner.advance_next_stop("s", id).await.unwrap();
        assert_eq!(last.itinerary.current_stop().unwrap().place.city, "Faro");

        let err = f.planner.advance_next_stop("s", id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoNextStop { .. })
        ));
    }

    #[tokio::test]
    async fn finished_itineraries_estimate_zero() {
        let f = fixture().await;
        let mut done = Itinerary::new("s", "Done").with_stops(vec![Stop::new(
            0,
            Place::new(1, "Portugal", "Lisbon"),
        )]);
        done.status = Status::Completed;
        let done = f.store.save(&done).await.unwrap();
        f.planner.create("s", draft("Open", &[2])).await.unwrap();

        let views = f.planner.list("s", None).await.unwrap();
        assert_eq!(views.len(), 2);
        let finished = views.iter().find(|v| v.itinerary.id == done.id).unwrap();
        assert_eq!(finished.estimated_wait_seconds, 0);

        let completed = f.planner.list("s", Some(Status::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(f.planner.get("s", done.id).await.unwrap().estimated_wait_seconds, 0);
    }

    #[test]
    fn view_flattens_itinerary_fields() {
        let view = ItineraryView {
            itinerary: Itinerary::new("s", "Coast"),
            estimated_wait_seconds: 12,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["title"], "Coast");
        assert_eq!(json["status"], "QUEUED");
        assert_eq!(json["estimated_wait_seconds"], 12);
    }
}
