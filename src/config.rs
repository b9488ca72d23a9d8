//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Worker pool and per-stop timing configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pool label used in logs.
    pub pool_name: String,
    /// Number of itineraries processed in parallel.
    pub pool_size: usize,
    /// Submissions allowed to wait for a free slot.
    pub queue_capacity: usize,
    /// Simulated work per stop.
    pub stop_duration: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_name: "itinerary-worker".to_string(),
            pool_size: 5,
            queue_capacity: 100,
            stop_duration: Duration::from_millis(2000),
        }
    }
}

impl SchedulerConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pool_name = lookup("ITINERARY_POOL_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.pool_name);

        let pool_size: usize = lookup("ITINERARY_POOL_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.pool_size);

        let queue_capacity: usize = lookup("ITINERARY_QUEUE_CAPACITY")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.queue_capacity);

        let stop_duration = lookup("ITINERARY_STOP_DURATION_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.stop_duration);

        Self {
            pool_name,
            pool_size,
            queue_capacity,
            stop_duration,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ITINERARY_POOL_SIZE".to_string(),
                message: "pool needs at least one worker slot".to_string(),
            });
        }
        Ok(())
    }

    /// Jobs that may be running or waiting at once.
    pub fn capacity(&self) -> usize {
        self.pool_size + self.queue_capacity
    }
}
