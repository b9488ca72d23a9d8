//! Itinerary execution.
//!
//! Core components:
//! - `pool` — bounded worker pool (fixed slots plus a capped wait queue)
//! - `worker` — runs one itinerary's stops and drives its status
//! - `scheduler` — job id → in-flight handle registry, submit and cancel-and-requeue
//! - `estimator` — backlog-based wait estimate

pub mod estimator;
pub mod pool;
pub mod scheduler;
pub mod worker;

pub use estimator::WaitEstimator;
pub use pool::{TaskHandle, WorkerPool};
pub use scheduler::Scheduler;
pub use worker::{SimulatedStopWork, StopProcessor, Worker, WorkerDeps, WorkerOutcome};
