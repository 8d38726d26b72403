//! Message processor: the queue's sole consumer.
//!
//! Owns a dedicated OS thread running the drain loop. The thread blocks
//! inside [`IngestQueue::pop_or_wait`] whenever the queue is empty and is
//! woken by producer pushes or by [`MessageProcessor::stop`]. Documents are
//! folded into the store strictly in push order; a fault while folding one
//! document is contained inside the store and never ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info};

use crate::health::HealthMetrics;
use crate::queue::IngestQueue;
use crate::store::AggregationStore;

/// Processor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Single consumer draining the ingestion queue into the store.
pub struct MessageProcessor {
    queue: Arc<IngestQueue>,
    store: Arc<AggregationStore>,
    health: Arc<HealthMetrics>,
    running: Arc<AtomicBool>,
    state: ProcessorState,
    handle: Option<JoinHandle<()>>,
}

impl MessageProcessor {
    /// Creates a processor bound to a queue and a store. Does not start it.
    pub fn new(
        queue: Arc<IngestQueue>,
        store: Arc<AggregationStore>,
        health: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            queue,
            store,
            health,
            running: Arc::new(AtomicBool::new(false)),
            state: ProcessorState::Stopped,
            handle: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Launches the consumer thread.
    ///
    /// On spawn failure (resource exhaustion) the run flag is cleared, the
    /// state returns to Stopped, and the error is surfaced to the caller.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("message processor already running");
        }

        self.state = ProcessorState::Starting;
        self.running.store(true, Ordering::SeqCst);

        let queue = Arc::clone(&self.queue);
        let store = Arc::clone(&self.store);
        let health = Arc::clone(&self.health);
        let running = Arc::clone(&self.running);

        let spawned = std::thread::Builder::new()
            .name("message-processor".to_string())
            .spawn(move || drain_loop(&queue, &store, &health, &running));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ProcessorState::Running;
                info!("message processor started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.state = ProcessorState::Stopped;
                Err(e).context("spawning message processor thread")
            }
        }
    }

    /// Stops the consumer: clears the run flag, wakes the thread, joins it.
    ///
    /// Blocks until the thread exits; there is no shutdown timeout. Any
    /// documents still queued are left untouched. Double-stop discipline is
    /// the lifecycle controller's responsibility.
    pub fn stop(&mut self) {
        self.state = ProcessorState::Stopping;
        self.running.store(false, Ordering::SeqCst);
        self.queue.notify_all();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("message processor thread panicked before join");
            }
        }

        self.state = ProcessorState::Stopped;
        info!("message processor stopped");
    }
}

/// The repeat-pop-or-wait cycle.
///
/// Exits only when the run flag is observed cleared after a wakeup, never in
/// the middle of a document.
fn drain_loop(
    queue: &IngestQueue,
    store: &AggregationStore,
    health: &HealthMetrics,
    running: &AtomicBool,
) {
    debug!("drain loop entered");

    while let Some(document) = queue.pop_or_wait(running) {
        store.add_record(&document);
        health.documents_processed.inc();
        health.queue_depth.set(queue.len() as f64);
        health.devices_tracked.set(store.device_count() as f64);
    }

    debug!("drain loop exited");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::document::MeasurementDocument;

    fn fixture() -> (Arc<IngestQueue>, Arc<AggregationStore>, MessageProcessor) {
        let queue = Arc::new(IngestQueue::new());
        let store = Arc::new(AggregationStore::new());
        let health = Arc::new(HealthMetrics::new("127.0.0.1:0").expect("metrics register"));
        let processor =
            MessageProcessor::new(Arc::clone(&queue), Arc::clone(&store), health);
        (queue, store, processor)
    }

    fn doc(name: &str, kind: Option<&str>) -> Arc<MeasurementDocument> {
        let raw = match kind {
            Some(kind) => format!(r#"{{"name":"{name}","timestamp":"t","{kind}":{{}}}}"#),
            None => format!(r#"{{"name":"{name}","timestamp":"t"}}"#),
        };
        Arc::new(MeasurementDocument::from_slice(raw.as_bytes()).expect("valid document"))
    }

    fn wait_for_total(store: &AggregationStore, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.grand_total() < expected {
            assert!(Instant::now() < deadline, "drain timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_drains_queued_documents() {
        let (queue, store, mut processor) = fixture();
        for i in 0..10 {
            queue.push(doc(&format!("dev-{}", i % 3), Some("current")));
        }

        processor.start().expect("processor starts");
        assert_eq!(processor.state(), ProcessorState::Running);

        wait_for_total(&store, 10);
        processor.stop();

        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(store.grand_total(), 10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wakes_on_push_after_idle() {
        let (queue, store, mut processor) = fixture();
        processor.start().expect("processor starts");

        // Consumer is parked on the empty queue; a push must wake it.
        std::thread::sleep(Duration::from_millis(50));
        queue.push(doc("dev-1", Some("voltage")));

        wait_for_total(&store, 1);
        processor.stop();
        assert_eq!(store.device_message_count("dev-1"), Some(1));
    }

    #[test]
    fn test_push_then_stop_start_processes_exactly_once() {
        let (queue, store, mut processor) = fixture();
        processor.start().expect("processor starts");
        processor.stop();

        // Document pushed while stopped survives the cycle untouched.
        queue.push(doc("dev-1", None));
        assert_eq!(queue.len(), 1);
        assert_eq!(store.grand_total(), 0);

        processor.start().expect("processor restarts");
        wait_for_total(&store, 1);
        processor.stop();

        assert_eq!(store.grand_total(), 1);
        assert_eq!(store.device_message_count("dev-1"), Some(1));
    }

    #[test]
    fn test_stop_leaves_unconsumed_documents_inspectable() {
        let (queue, _store, mut processor) = fixture();
        processor.start().expect("processor starts");
        processor.stop();

        queue.push(doc("dev-1", None));
        queue.push(doc("dev-2", None));

        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.pop().expect("first").device_name().unwrap(),
            "dev-1"
        );
    }

    #[test]
    fn test_start_twice_fails() {
        let (_queue, _store, mut processor) = fixture();
        processor.start().expect("first start succeeds");
        assert!(processor.start().is_err());
        processor.stop();
    }

    #[test]
    fn test_malformed_document_does_not_kill_the_loop() {
        let (queue, store, mut processor) = fixture();
        processor.start().expect("processor starts");

        // Missing name: counts toward the grand total, then is dropped.
        queue.push(Arc::new(
            MeasurementDocument::from_slice(br#"{"timestamp":"t"}"#).expect("parses"),
        ));
        queue.push(doc("dev-1", Some("temperature")));

        wait_for_total(&store, 2);
        processor.stop();

        assert_eq!(store.grand_total(), 2);
        assert_eq!(store.device_count(), 1);
    }
}
