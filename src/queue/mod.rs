//! Validating ingestion queue.
//!
//! FIFO handoff between the HTTP producers and the single consumer thread.
//! Documents are schema-checked *before* they are pushed; the queue never
//! holds an invalid document.
//!
//! One mutex guards both the queue state and the condition variable the
//! consumer waits on. The emptiness check and the entry into the wait are a
//! single critical section, and [`IngestQueue::notify_all`] acquires the same
//! mutex before notifying, so a push or a shutdown signal can never slip
//! between "saw empty" and "started waiting" (no lost wakeups).
//!
//! The queue is unbounded: sustained overload grows memory. Backpressure, if
//! needed, belongs to the callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::document::MeasurementDocument;

/// Thread-safe FIFO of validated measurement documents.
pub struct IngestQueue {
    queue: Mutex<VecDeque<Arc<MeasurementDocument>>>,
    available: Condvar,
}

impl IngestQueue {
    /// Creates an empty queue with its own wait/notify primitive.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends a document at the tail and wakes the consumer.
    ///
    /// Returns false only on allocation failure; content is never inspected
    /// here, the schema gate runs before push.
    pub fn push(&self, document: Arc<MeasurementDocument>) -> bool {
        let mut queue = self.queue.lock();
        if let Err(e) = queue.try_reserve(1) {
            error!(error = %e, "unable to push new message to queue");
            return false;
        }
        queue.push_back(document);
        self.available.notify_one();
        true
    }

    /// Removes and returns the head without blocking.
    pub fn pop(&self) -> Option<Arc<MeasurementDocument>> {
        self.queue.lock().pop_front()
    }

    /// Consumer entry point: pops the head, or blocks until notified.
    ///
    /// Returns `None` once `running` is observed cleared; any documents still
    /// queued at that point are left untouched. The run-flag check, the pop
    /// attempt, and the wait all happen under the queue mutex.
    pub fn pop_or_wait(&self, running: &AtomicBool) -> Option<Arc<MeasurementDocument>> {
        let mut queue = self.queue.lock();
        loop {
            if !running.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(document) = queue.pop_front() {
                return Some(document);
            }
            self.available.wait(&mut queue);
        }
    }

    /// Wakes every waiting consumer.
    ///
    /// Takes the queue mutex first so the notification is ordered with any
    /// in-flight check-then-wait. Safe to call when nobody is waiting.
    pub fn notify_all(&self) {
        let _queue = self.queue.lock();
        self.available.notify_all();
    }

    /// Number of queued documents.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if no documents are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}
