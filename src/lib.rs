//! Itinerary scheduler — bounded execution of itinerary jobs.

pub mod config;
pub mod error;
pub mod itinerary;
pub mod planner;
pub mod store;
pub mod worker;
