//! Bounded in-memory job queue.
//!
//! A `JobQueue` is the only resource shared between a producer (a discovery
//! provider) and the consumers (the schedule functions driven by worker pool
//! workers). It supports:
//!
//! - Bounded sends with a timeout (`send_timeout`)
//! - Non-blocking receives that distinguish "empty" from "closed and drained"
//! - A readiness future so consumers can park on several queues at once
//! - One-shot, producer-side close
//!
//! # Synchronization
//!
//! Items live in a `VecDeque` behind a mutex. Two semaphores track free slots
//! and buffered items, so waiting for space or for work never holds the lock.
//! Closing both semaphores wakes every parked sender and consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::debug;

/// Errors returned when a job cannot be placed on the queue.
///
/// The rejected job is handed back so the caller can buffer it.
#[derive(Debug, Error)]
pub enum SendError<J> {
    /// No slot freed up before the timeout expired.
    #[error("Enqueue timed out")]
    Timeout(J),

    /// The queue was closed by its producer.
    #[error("Queue is closed")]
    Closed(J),
}

impl<J> SendError<J> {
    /// Returns the job that could not be sent.
    pub fn into_inner(self) -> J {
        match self {
            SendError::Timeout(job) | SendError::Closed(job) => job,
        }
    }

    /// Returns whether the send failed because of a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SendError::Timeout(_))
    }
}

/// Queue failure surfaced to callers that no longer hold the job.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed by its producer.
    #[error("Queue '{0}' is closed")]
    Closed(String),
}

/// Outcome of a non-blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<J> {
    /// A job was taken from the head of the queue.
    Received(J),
    /// Nothing is buffered right now but the queue is still open.
    Empty,
    /// The queue is closed and every buffered job has been taken.
    Closed,
}

/// Bounded FIFO queue of jobs.
pub struct JobQueue<J> {
    /// Name used in logs and metrics.
    name: String,
    /// Maximum number of buffered jobs.
    capacity: usize,
    /// Buffered jobs in arrival order.
    items: Mutex<VecDeque<J>>,
    /// One permit per free slot.
    slots: Semaphore,
    /// One permit per buffered job.
    available: Semaphore,
    /// Set once by `close`.
    closed: AtomicBool,
}

impl<J> JobQueue<J> {
    /// Creates a new open queue.
    ///
    /// A capacity of zero is raised to one: a job queue always buffers at
    /// least one job.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            available: Semaphore::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of buffered jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of buffered jobs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether no job is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the producer closed the queue.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns whether the queue is closed and fully drained.
    pub fn is_exhausted(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    /// Sends a job, waiting at most `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Timeout` if no slot freed up in time and
    /// `SendError::Closed` if the queue is closed. Both carry the job back.
    pub async fn send_timeout(&self, job: J, timeout: Duration) -> Result<(), SendError<J>> {
        if self.is_closed() {
            return Err(SendError::Closed(job));
        }

        match tokio::time::timeout(timeout, self.slots.acquire()).await {
            Err(_) => Err(SendError::Timeout(job)),
            Ok(Err(_)) => Err(SendError::Closed(job)),
            Ok(Ok(permit)) => {
                permit.forget();
                self.push(job);
                Ok(())
            }
        }
    }

    /// Sends a job, waiting as long as needed for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Closed` if the queue is closed.
    pub async fn send(&self, job: J) -> Result<(), SendError<J>> {
        if self.is_closed() {
            return Err(SendError::Closed(job));
        }

        match self.slots.acquire().await {
            Err(_) => Err(SendError::Closed(job)),
            Ok(permit) => {
                permit.forget();
                self.push(job);
                Ok(())
            }
        }
    }

    /// Takes the job at the head of the queue without waiting.
    pub fn try_recv(&self) -> TryRecv<J> {
        match self.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                // A concurrent drain after close may have taken the item
                // this permit counted.
                match self.pop() {
                    Some(job) => TryRecv::Received(job),
                    None => TryRecv::Empty,
                }
            }
            Err(TryAcquireError::NoPermits) => TryRecv::Empty,
            Err(TryAcquireError::Closed) => match self.pop() {
                Some(job) => TryRecv::Received(job),
                None => TryRecv::Closed,
            },
        }
    }

    /// Waits for the next job.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<J> {
        loop {
            match self.try_recv() {
                TryRecv::Received(job) => return Some(job),
                TryRecv::Closed => return None,
                TryRecv::Empty => self.ready().await,
            }
        }
    }

    /// Resolves when a job is buffered or the queue is closed.
    ///
    /// Does not take the job: a subsequent `try_recv` may still come back
    /// empty if another consumer got there first.
    pub async fn ready(&self) {
        // The permit goes straight back when dropped; we only wait on it.
        let _ = self.available.acquire().await;
    }

    /// Closes the queue. Only the producer closes, and only once; later
    /// calls are no-ops.
    ///
    /// Buffered jobs stay available to consumers until drained.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.slots.close();
        self.available.close();
        debug!(queue = %self.name, pending = self.len(), "queue closed");
    }

    fn push(&self, job: J) {
        self.lock().push_back(job);
        self.available.add_permits(1);
    }

    fn pop(&self) -> Option<J> {
        let job = self.lock().pop_front();
        if job.is_some() {
            self.slots.add_permits(1);
        }
        job
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<J>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<J> std::fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
