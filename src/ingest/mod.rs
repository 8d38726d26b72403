//! Device-facing REST API.
//!
//! `POST /device/measurement` runs the submit pipeline: parse the body as
//! JSON, check it against the compiled schema, push it onto the ingestion
//! queue. `GET /device/measurement` returns the store's plain-text report,
//! reading the store directly and bypassing the queue.
//!
//! Rejections are surfaced synchronously to the caller by category only;
//! schema-validation detail never leaves this boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::IngestConfig;
use crate::document::{DocumentError, MeasurementDocument};
use crate::health::HealthMetrics;
use crate::queue::IngestQueue;
use crate::schema::MeasurementSchema;
use crate::store::AggregationStore;

/// Why a submission was rejected at the ingest boundary.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("malformed document: {0}")]
    Malformed(#[from] DocumentError),

    #[error("document failed schema validation")]
    SchemaViolation,

    #[error("ingestion queue rejected the document")]
    PushFailed,
}

impl SubmitError {
    /// Metric label for the rejection reason.
    fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::SchemaViolation => "schema",
            Self::PushFailed => "queue",
        }
    }
}

/// Shared state behind the ingest routes.
pub struct IngestState {
    schema: MeasurementSchema,
    queue: Arc<IngestQueue>,
    store: Arc<AggregationStore>,
    health: Arc<HealthMetrics>,
}

impl IngestState {
    /// Bundles the schema gate with the pipeline ends it feeds and serves.
    pub fn new(
        schema: MeasurementSchema,
        queue: Arc<IngestQueue>,
        store: Arc<AggregationStore>,
        health: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            schema,
            queue,
            store,
            health,
        }
    }

    /// Runs one raw submission through parse, schema gate, queue push.
    ///
    /// On success the document is owned by the queue. The schema gate runs
    /// strictly before the push; the queue never sees an invalid document.
    pub fn submit(&self, raw: &[u8]) -> Result<(), SubmitError> {
        self.health.documents_received.inc();

        let outcome = self.submit_inner(raw);
        if let Err(e) = &outcome {
            self.health
                .documents_rejected
                .with_label_values(&[e.reason()])
                .inc();
        }
        outcome
    }

    fn submit_inner(&self, raw: &[u8]) -> Result<(), SubmitError> {
        let document = MeasurementDocument::from_slice(raw)?;

        if !self.schema.is_valid(document.as_value()) {
            return Err(SubmitError::SchemaViolation);
        }

        if !self.queue.push(Arc::new(document)) {
            return Err(SubmitError::PushFailed);
        }

        self.health.queue_depth.set(self.queue.len() as f64);
        Ok(())
    }

    /// Current report snapshot, straight from the store.
    pub fn report(&self) -> String {
        self.store.render_report()
    }
}

/// REST API server for device submissions and report queries.
pub struct IngestApi {
    address: String,
    state: Arc<IngestState>,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl IngestApi {
    /// Creates the API around an already-compiled schema and pipeline ends.
    pub fn new(cfg: &IngestConfig, state: IngestState) -> Self {
        Self {
            address: cfg.address.clone(),
            state: Arc::new(state),
            shutdown: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    /// Starts listening and serving; returns once the socket is bound.
    pub async fn start(&self) -> Result<()> {
        let app = Router::new()
            .route(
                "/device/measurement",
                post(submit_handler).get(report_handler),
            )
            .with_state(Arc::clone(&self.state));

        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("listening on {}", self.address))?;

        let local_addr = listener.local_addr().context("getting local address")?;
        *self.local_addr.lock() = Some(local_addr);

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            info!(addr = %local_addr, "ingest API started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "ingest API server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the server. In-flight requests finish first.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }

    /// The address the server actually bound to (set once started).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

/// POST /device/measurement - submit one telemetry document.
async fn submit_handler(State(state): State<Arc<IngestState>>, body: Bytes) -> StatusCode {
    match state.submit(&body) {
        Ok(()) => {
            debug!(bytes = body.len(), "document accepted");
            StatusCode::OK
        }
        Err(e @ (SubmitError::Malformed(_) | SubmitError::SchemaViolation)) => {
            error!(error = %e, payload = %String::from_utf8_lossy(&body), "document rejected");
            StatusCode::BAD_REQUEST
        }
        Err(e @ SubmitError::PushFailed) => {
            error!(error = %e, "document dropped");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// GET /device/measurement - plain-text aggregate report.
async fn report_handler(State(state): State<Arc<IngestState>>) -> impl IntoResponse {
    (StatusCode::OK, state.report())
}
