//! Error types for the itinerary scheduler.

use uuid::Uuid;

use crate::itinerary::Status;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Job scheduling and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Itinerary {id} not found")]
    NotFound { id: Uuid },

    #[error("Worker pool {pool} is overloaded ({capacity} jobs in flight)")]
    Overloaded { pool: String, capacity: usize },

    #[error("Itinerary {id} failed at stop {order_index}: {reason}")]
    StopProcessing {
        id: Uuid,
        order_index: u32,
        reason: String,
    },

    #[error("Itinerary {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: Status, to: Status },
}

/// Rejections of caller-supplied itinerary data.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Session id is missing")]
    MissingSession,

    #[error("Itinerary title must not be blank")]
    BlankTitle,

    #[error("Only one stop may be the current stop, found {count}")]
    MultipleCurrentStops { count: usize },

    #[error("Duplicate stop order index {order_index}")]
    DuplicateOrderIndex { order_index: u32 },

    #[error("Place {place_id} not found")]
    UnknownPlace { place_id: i64 },

    #[error("Itinerary {id} has no stop after the current one")]
    NoNextStop { id: Uuid },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
