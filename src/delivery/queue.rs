//! Bounded-concurrency delivery queue.
//!
//! Each admitted task holds one semaphore permit for as long as it runs. The
//! permit moves into the spawned task and is dropped when that task's future
//! finishes, panics or is torn down, so a slot is released exactly once on
//! every exit path. Every release wakes pending drains; draining never holds
//! permits itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default number of concurrently outstanding tasks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// Errors produced by the delivery queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Every slot is taken; the task was dropped without running.
    #[error("Delivery queue full ({capacity} tasks outstanding)")]
    QueueFull { capacity: usize },
    /// The task panicked or its runtime shut down before it settled.
    #[error("Delivery task aborted: {0}")]
    Aborted(String),
}

/// Admission and execution engine for outbound requests.
///
/// Cloning is cheap; clones share the same slots.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    slots: Arc<Semaphore>,
    released: Arc<Notify>,
    capacity: usize,
}

impl DeliveryQueue {
    /// Create a queue that runs at most `capacity` tasks at once.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            released: Arc::new(Notify::new()),
            capacity,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently holding a slot.
    pub fn outstanding(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Admit `task` and start running it on the current Tokio runtime.
    ///
    /// Fails immediately with [`DeliveryError::QueueFull`] when every slot is
    /// taken; the task is dropped, never delayed. Completion order across
    /// submissions is unspecified. Dropping the returned [`Submission`] does
    /// not cancel the task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn submit<F, T>(&self, task: F) -> Result<Submission<T>, DeliveryError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                warn!(capacity = self.capacity, "Delivery queue full, dropping task");
                return Err(DeliveryError::QueueFull {
                    capacity: self.capacity,
                });
            }
        };

        trace!(outstanding = self.outstanding(), "Task admitted");

        let slot = Slot {
            permit: Some(permit),
            released: Arc::clone(&self.released),
        };
        let handle = tokio::spawn(async move {
            let _slot = slot;
            task.await
        });

        Ok(Submission { handle })
    }

    /// Wait until no task is outstanding, for at most `timeout`.
    ///
    /// Returns `true` if the queue drained in time. Submissions keep being
    /// admitted while a drain is pending, so under steady load the queue may
    /// never drain.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let settled = async {
            loop {
                let released = self.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();

                if self.outstanding() == 0 {
                    return;
                }
                released.await;
            }
        };

        match tokio::time::timeout(timeout, settled).await {
            Ok(()) => {
                debug!("Delivery queue drained");
                true
            }
            Err(_elapsed) => {
                debug!(
                    outstanding = self.outstanding(),
                    "Delivery queue did not drain before timeout"
                );
                false
            }
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// A held slot. Returns its permit and wakes drains when dropped.
struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

/// Handle to an admitted task; resolves with the task's output.
#[derive(Debug)]
pub struct Submission<T> {
    handle: JoinHandle<T>,
}

impl<T> Future for Submission<T> {
    type Output = Result<T, DeliveryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.map_err(|e| DeliveryError::Aborted(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    /// Submit a task that stays in flight until the returned sender fires.
    fn submit_gated(
        queue: &DeliveryQueue,
        value: u32,
    ) -> (oneshot::Sender<()>, Result<Submission<u32>, DeliveryError>) {
        let (release, gate) = oneshot::channel::<()>();
        let submission = queue.submit(async move {
            let _ = gate.await;
            value
        });
        (release, submission)
    }

    #[tokio::test]
    async fn test_queue_creation() {
        let queue = DeliveryQueue::default();
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_submit_runs_task() {
        let queue = DeliveryQueue::new(1);
        let submission = assert_ok!(queue.submit(async { 7 }));

        assert_eq!(submission.await, Ok(7));
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_rejects_beyond_capacity() {
        let queue = DeliveryQueue::new(2);

        let (_r1, first) = submit_gated(&queue, 1);
        let (_r2, second) = submit_gated(&queue, 2);
        let (_r3, third) = submit_gated(&queue, 3);

        assert_ok!(first);
        assert_ok!(second);
        assert_eq!(assert_err!(third), DeliveryError::QueueFull { capacity: 2 });
        assert_eq!(queue.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_completion_frees_slot() {
        let queue = DeliveryQueue::new(2);

        let (r1, first) = submit_gated(&queue, 1);
        let (_r2, second) = submit_gated(&queue, 2);
        let first = assert_ok!(first);
        let _second = assert_ok!(second);
        assert_err!(queue.submit(async { 0 }));

        r1.send(()).unwrap();
        assert_eq!(first.await, Ok(1));
        assert_eq!(queue.outstanding(), 1);

        let (_r3, third) = submit_gated(&queue, 3);
        assert_ok!(third);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let queue = DeliveryQueue::new(1);
        let submission = assert_ok!(queue.submit(async {
            panic!("boom");
        }));

        let result: Result<(), DeliveryError> = submission.await;
        assert!(matches!(result, Err(DeliveryError::Aborted(_))));
        assert_eq!(queue.outstanding(), 0);
        assert_ok!(queue.submit(async {}));
    }

    #[tokio::test]
    async fn test_completes_out_of_order() {
        let queue = DeliveryQueue::new(2);

        let (r1, first) = submit_gated(&queue, 1);
        let (r2, second) = submit_gated(&queue, 2);
        let (first, second) = (assert_ok!(first), assert_ok!(second));

        r2.send(()).unwrap();
        assert_eq!(second.await, Ok(2));
        assert_eq!(queue.outstanding(), 1);

        r1.send(()).unwrap();
        assert_eq!(first.await, Ok(1));
    }

    #[tokio::test]
    async fn test_dropping_submission_does_not_cancel() {
        let queue = DeliveryQueue::new(1);
        let (done_tx, done_rx) = oneshot::channel();

        drop(assert_ok!(queue.submit(async move {
            done_tx.send(()).unwrap();
        })));

        assert_ok!(done_rx.await);
    }

    #[tokio::test]
    async fn test_drain() {
        let queue = DeliveryQueue::new(2);
        assert!(queue.drain(Duration::from_millis(10)).await);

        let (release, submission) = submit_gated(&queue, 1);
        let _submission = assert_ok!(submission);
        assert!(!queue.drain(Duration::from_millis(20)).await);

        release.send(()).unwrap();
        assert!(queue.drain(Duration::from_secs(1)).await);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_submissions_admitted_while_draining() {
        let queue = DeliveryQueue::new(3);
        let (r1, first) = submit_gated(&queue, 1);
        let first = assert_ok!(first);

        let draining = tokio::spawn({
            let queue = queue.clone();
            async move { queue.drain(Duration::from_secs(2)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!draining.is_finished());
        assert_eq!(queue.outstanding(), 1);

        let (r2, second) = submit_gated(&queue, 2);
        let second = assert_ok!(second);
        assert_eq!(queue.outstanding(), 2);

        r1.send(()).unwrap();
        assert_eq!(first.await, Ok(1));
        assert!(!draining.is_finished());

        r2.send(()).unwrap();
        assert_eq!(second.await, Ok(2));
        assert!(draining.await.unwrap());
        assert_eq!(queue.outstanding(), 0);
    }
}
