//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session reporting, and Prometheus metrics,
//! served on its own port so probes never share the stream listener.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::instrument::SharedInstrumentStore;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::sse::server::SessionCounters;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Session counts.
    pub sessions: SessionStatus,
    /// Number of simulated instruments.
    pub instruments: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving streams.
    Healthy,
    /// Shutting down; no new sessions will be useful.
    Unhealthy,
}

/// Session counts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Sessions currently streaming.
    pub active: usize,
    /// Sessions accepted since startup.
    pub total: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    sessions: Arc<SessionCounters>,
    store: SharedInstrumentStore,
    shutdown: CancellationToken,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        sessions: Arc<SessionCounters>,
        store: SharedInstrumentStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            sessions,
            store,
            shutdown,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = create_health_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Router with the health endpoints.
#[must_use]
pub fn create_health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    HealthResponse {
        status: determine_health_status(state.shutdown.is_cancelled()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions: SessionStatus {
            active: state.sessions.active(),
            total: state.sessions.total(),
        },
        instruments: state.store.len(),
    }
}

const fn determine_health_status(shutting_down: bool) -> HealthStatus {
    if shutting_down {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::instrument::InstrumentStore;

    fn test_state(shutdown: CancellationToken) -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "test-0.0.1".to_string(),
            Arc::new(SessionCounters::new()),
            Arc::new(InstrumentStore::with_defaults()),
            shutdown,
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_shutdown() {
        assert_eq!(determine_health_status(false), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn health_endpoint_reports_sessions_and_instruments() {
        let app = create_health_router(test_state(CancellationToken::new()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "test-0.0.1");
        assert_eq!(json["sessions"]["active"], 0);
        assert_eq!(json["sessions"]["total"], 0);
        assert_eq!(json["instruments"], 6);
    }

    #[tokio::test]
    async fn health_endpoint_unavailable_during_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let app = create_health_router(test_state(shutdown));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_endpoint() {
        let app = create_health_router(test_state(CancellationToken::new()));

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }
}
