//! Bounded worker pool.
//!
//! `size` execution slots fed by a wait queue of `queue_capacity`. Admission
//! is decided up front with a non-blocking permit grab, so a submission either
//! gets a place (running or waiting) or fails immediately with `Overloaded`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::JobError;
use crate::worker::worker::WorkerOutcome;

/// Handle to one in-flight execution.
///
/// Cloneable; every clone observes the same execution. Two handles are equal
/// only when they refer to the same submission.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    job_id: Uuid,
    token: CancellationToken,
    outcome: watch::Receiver<Option<WorkerOutcome>>,
}

impl TaskHandle {
    /// Pool-unique submission id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some() || self.outcome.has_changed().is_err()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` when the execution had already finished.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Wait for the execution to end and return its outcome.
    pub async fn wait(&self) -> Option<WorkerOutcome> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

/// Fixed-size pool with a bounded submission queue.
pub struct WorkerPool {
    name: String,
    size: usize,
    queue_capacity: usize,
    /// Running plus waiting executions.
    admission: Arc<Semaphore>,
    /// Execution slots.
    slots: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &SchedulerConfig) -> Self {
        tracing::info!(
            pool = %config.pool_name,
            size = config.pool_size,
            queue_capacity = config.queue_capacity,
            "Worker pool initialized"
        );
        Self {
            name: config.pool_name.clone(),
            size: config.pool_size,
            queue_capacity: config.queue_capacity,
            admission: Arc::new(Semaphore::new(config.capacity())),
            slots: Arc::new(Semaphore::new(config.pool_size)),
            running: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Executions holding a slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Executions admitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        (self.size + self.queue_capacity).saturating_sub(self.admission.available_permits())
    }

    /// Executions waiting for a slot.
    pub fn queued(&self) -> usize {
        self.in_flight().saturating_sub(self.running())
    }

    /// Submit work for `job_id`. Never blocks.
    ///
    /// `work` receives the execution's cancellation token. If the token is
    /// cancelled while the execution is still waiting for a slot, `work` is
    /// never started and the outcome is `Cancelled`. Panics inside `work` are
    /// caught and reported as `Panicked`.
    pub fn spawn<F, Fut>(&self, job_id: Uuid, work: F) -> Result<TaskHandle, JobError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = WorkerOutcome> + Send + 'static,
    {
        let admit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| {
                warn!(pool = %self.name, job_id = %job_id, "Pool saturated, rejecting submission");
                JobError::Overloaded {
                    pool: self.name.clone(),
                    capacity: self.size + self.queue_capacity,
                }
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let task_token = token.clone();
        let slots = Arc::clone(&self.slots);
        let running = Arc::clone(&self.running);
        let pool = self.name.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = task_token.cancelled() => None,
                permit = slots.acquire_owned() => permit.ok(),
            };

            let outcome = match permit {
                None => {
                    debug!(pool = %pool, job_id = %job_id, "Cancelled before a slot was free");
                    WorkerOutcome::Cancelled
                }
                Some(_permit) => {
                    running.fetch_add(1, Ordering::Relaxed);
                    let result = AssertUnwindSafe(work(task_token)).catch_unwind().await;
                    running.fetch_sub(1, Ordering::Relaxed);
                    match result {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!(pool = %pool, job_id = %job_id, "Worker panicked");
                            WorkerOutcome::Panicked
                        }
                    }
                }
            };

            drop(admit);
            outcome_tx.send_replace(Some(outcome));
        });

        debug!(pool = %self.name, job_id = %job_id, handle = id, "Submission admitted");

        Ok(TaskHandle {
            id,
            job_id,
            token,
            outcome: outcome_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn explode() -> WorkerOutcome {
        panic!("boom")
    }

    fn pool(size: usize, queue_capacity: usize) -> WorkerPool {
        WorkerPool::new(&SchedulerConfig {
            pool_name: "test-pool".into(),
            pool_size: size,
            queue_capacity,
            stop_duration: Duration::from_millis(1),
        })
    }

    #[test]
    fn reports_configured_shape() {
        let pool = pool(3, 7);
        assert_eq!(pool.name(), "test-pool");
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.queue_capacity(), 7);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn rejects_beyond_slots_plus_queue() {
        let pool = pool(2, 3);
        let gate = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let handle = pool
                .spawn(Uuid::new_v4(), move |_| async move {
                    gate.cancelled().await;
                    WorkerOutcome::Completed
                })
                .unwrap();
            handles.push(handle);
        }
        assert_eq!(pool.in_flight(), 5);

        let err = pool
            .spawn(Uuid::new_v4(), |_| async { WorkerOutcome::Completed })
            .unwrap_err();
        assert!(matches!(err, JobError::Overloaded { capacity: 5, .. }));

        for handle in &handles {
            handle.cancel();
        }
        gate.cancel();
        for handle in &handles {
            handle.wait().await;
        }
    }

    #[tokio::test]
    async fn capacity_is_released_after_completion() {
        let pool = pool(1, 0);
        let first = pool
            .spawn(Uuid::new_v4(), |_| async { WorkerOutcome::Completed })
            .unwrap();
        assert_eq!(first.wait().await, Some(WorkerOutcome::Completed));
        assert!(first.is_finished());

        let second = pool
            .spawn(Uuid::new_v4(), |_| async { WorkerOutcome::Completed })
            .unwrap();
        assert_eq!(second.wait().await, Some(WorkerOutcome::Completed));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn only_size_executions_run_at_once() {
        let pool = pool(2, 10);
        let gate = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            handles.push(
                pool.spawn(Uuid::new_v4(), move |token| async move {
                    tokio::select! {
                        _ = gate.cancelled() => {}
                        _ = token.cancelled() => {}
                    }
                    WorkerOutcome::Completed
                })
                .unwrap(),
            );
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.queued(), 2);

        for handle in &handles {
            handle.cancel();
        }
        for handle in &handles {
            handle.wait().await;
        }
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn cancelled_while_queued_never_runs() {
        let pool = pool(1, 1);
        let gate = CancellationToken::new();
        let blocker_gate = gate.clone();
        let blocker = pool
            .spawn(Uuid::new_v4(), move |_| async move {
                blocker_gate.cancelled().await;
                WorkerOutcome::Completed
            })
            .unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let started_in_task = Arc::clone(&started);
        let queued = pool
            .spawn(Uuid::new_v4(), move |_| async move {
                started_in_task.fetch_add(1, Ordering::SeqCst);
                WorkerOutcome::Completed
            })
            .unwrap();

        assert!(queued.cancel());
        assert_eq!(queued.wait().await, Some(WorkerOutcome::Cancelled));
        assert_eq!(started.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.cancel();
        assert_eq!(blocker.wait().await, Some(WorkerOutcome::Completed));
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let pool = pool(1, 0);
        let handle = pool
            .spawn(Uuid::new_v4(), |_| explode())
            .unwrap();
        assert_eq!(handle.wait().await, Some(WorkerOutcome::Panicked));

        let next = pool
            .spawn(Uuid::new_v4(), |_| async { WorkerOutcome::Completed })
            .unwrap();
        assert_eq!(next.wait().await, Some(WorkerOutcome::Completed));
    }

    #[tokio::test]
    async fn cancel_after_finish_reports_false() {
        let pool = pool(1, 0);
        let handle = pool
            .spawn(Uuid::new_v4(), |_| async { WorkerOutcome::Completed })
            .unwrap();
        handle.wait().await;
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn handles_compare_by_submission() {
        let pool = pool(2, 0);
        let job_id = Uuid::new_v4();
        let a = pool.spawn(job_id, |_| async { WorkerOutcome::Completed }).unwrap();
        let b = pool.spawn(job_id, |_| async { WorkerOutcome::Completed }).unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.job_id(), b.job_id());
        a.wait().await;
        b.wait().await;
    }
}
