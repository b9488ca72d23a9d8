//! Itinerary domain types.
//!
//! - `model` — Itinerary, Stop, Place and the caller-supplied drafts
//! - `status` — Status state machine (Queued → Processing → Completed/Failed)

pub mod model;
pub mod status;

pub use model::{Itinerary, ItineraryDraft, Place, Stop, StopDraft};
pub use status::Status;
