//! Prometheus metrics for service health and observability.
//!
//! Metrics are registered against a private registry and served from a small
//! axum app on a dedicated listen address, separate from the ingest API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Health metrics for the ingestion pipeline.
///
/// All metrics use the "devmon" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,

    /// Total documents received at the ingest endpoint.
    pub documents_received: Counter,
    /// Total documents rejected at the ingest boundary, by reason.
    pub documents_rejected: CounterVec,
    /// Total documents folded into the aggregation store.
    pub documents_processed: Counter,
    /// Current ingestion queue depth.
    pub queue_depth: Gauge,
    /// Number of distinct devices tracked by the store.
    pub devices_tracked: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let documents_received = Counter::with_opts(
            Opts::new(
                "documents_received_total",
                "Total documents received at the ingest endpoint.",
            )
            .namespace("devmon"),
        )?;
        let documents_rejected = CounterVec::new(
            Opts::new(
                "documents_rejected_total",
                "Total documents rejected at the ingest boundary by reason.",
            )
            .namespace("devmon"),
            &["reason"],
        )?;
        let documents_processed = Counter::with_opts(
            Opts::new(
                "documents_processed_total",
                "Total documents folded into the aggregation store.",
            )
            .namespace("devmon"),
        )?;
        let queue_depth = Gauge::with_opts(
            Opts::new("queue_depth", "Current ingestion queue depth.").namespace("devmon"),
        )?;
        let devices_tracked = Gauge::with_opts(
            Opts::new(
                "devices_tracked",
                "Number of distinct devices tracked by the store.",
            )
            .namespace("devmon"),
        )?;

        registry.register(Box::new(documents_received.clone()))?;
        registry.register(Box::new(documents_rejected.clone()))?;
        registry.register(Box::new(documents_processed.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(devices_tracked.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
            documents_received,
            documents_rejected,
            documents_processed,
            queue_depth,
            devices_tracked,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;
        *self.local_addr.lock() = Some(local_addr);

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
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

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }

    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

/// GET /healthz - liveness probe.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
