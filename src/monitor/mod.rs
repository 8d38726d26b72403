//! Lifecycle controller.
//!
//! Owns every long-lived piece of the pipeline with explicit construction:
//! the queue, the store, the schema gate, the processor, the ingest API, and
//! the health server. Start and stop run in a fixed order so a partial
//! startup never leaves half the service running.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::health::HealthMetrics;
use crate::ingest::{IngestApi, IngestState};
use crate::processor::MessageProcessor;
use crate::queue::IngestQueue;
use crate::schema::MeasurementSchema;
use crate::store::AggregationStore;

/// The assembled device-monitor service.
pub struct Monitor {
    health: Arc<HealthMetrics>,
    ingest: IngestApi,
    processor: MessageProcessor,
}

impl Monitor {
    /// Builds the full pipeline from configuration.
    ///
    /// Compiles the JSON Schema up front: if the schema cannot be loaded the
    /// service refuses to start rather than accept unvalidated documents.
    pub fn new(cfg: &Config) -> Result<Self> {
        let schema = MeasurementSchema::load(&cfg.ingest.schema_path)
            .context("loading measurement schema")?;

        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let queue = Arc::new(IngestQueue::new());
        let store = Arc::new(AggregationStore::new());

        let processor = MessageProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&health),
        );

        let ingest = IngestApi::new(
            &cfg.ingest,
            IngestState::new(schema, queue, store, Arc::clone(&health)),
        );

        Ok(Self {
            health,
            ingest,
            processor,
        })
    }

    /// Starts health server, ingest listener, then the consumer.
    ///
    /// If the consumer fails to start, everything already listening is shut
    /// down again before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        self.health
            .start()
            .await
            .context("starting health metrics server")?;

        if let Err(e) = self.ingest.start().await.context("starting ingest API") {
            let _ = self.health.stop().await;
            return Err(e);
        }

        if let Err(e) = self.processor.start().context("starting message processor") {
            if let Err(stop_err) = self.ingest.stop().await {
                error!(error = %stop_err, "error stopping ingest API during rollback");
            }
            let _ = self.health.stop().await;
            return Err(e);
        }

        info!("monitor fully started");

        Ok(())
    }

    /// Stops everything in the fixed order: consumer, ingest, health.
    ///
    /// The consumer finishes its in-flight document and is joined before the
    /// listeners go away; documents still queued at that point stay queued
    /// and are discarded with the process.
    pub async fn stop(&mut self) -> Result<()> {
        self.processor.stop();

        if let Err(e) = self.ingest.stop().await {
            error!(error = %e, "error stopping ingest API");
        }

        self.health.stop().await?;

        info!("monitor stopped");

        Ok(())
    }

    /// Bound address of the ingest API, once started.
    pub fn ingest_addr(&self) -> Option<std::net::SocketAddr> {
        self.ingest.local_addr()
    }

    /// Bound address of the health server, once started.
    pub fn health_addr(&self) -> Option<std::net::SocketAddr> {
        self.health.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, IngestConfig};

    fn test_config(schema_path: &str) -> Config {
        Config {
            log_level: "info".to_string(),
            ingest: IngestConfig {
                address: "127.0.0.1:0".to_string(),
                schema_path: schema_path.into(),
            },
            health: HealthConfig {
                addr: "127.0.0.1:0".to_string(),
            },
        }
    }

    #[test]
    fn test_missing_schema_refuses_to_build() {
        let cfg = test_config("/nonexistent/schema.json");
        assert!(Monitor::new(&cfg).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_stop() {
        let schema_path = concat!(env!("CARGO_MANIFEST_DIR"), "/etc/measurement.schema.json");
        let cfg = test_config(schema_path);

        let mut monitor = Monitor::new(&cfg).expect("monitor builds");
        monitor.start().await.expect("monitor starts");
        monitor.stop().await.expect("monitor stops");
    }
}
