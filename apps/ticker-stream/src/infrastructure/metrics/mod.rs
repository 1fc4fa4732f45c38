//! Prometheus Metrics Module
//!
//! Exposes session and event metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Opened, active and closed stream sessions
//! - **Events**: Events written to clients by kind
//! - **Errors**: Ticks skipped because a snapshot could not be encoded
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::sse::session::CloseReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_sessions_opened_total",
        "Total stream sessions accepted"
    );
    describe_gauge!("ticker_sessions_active", "Stream sessions currently open");
    describe_counter!(
        "ticker_sessions_closed_total",
        "Total stream sessions closed by reason"
    );
    describe_histogram!(
        "ticker_session_duration_seconds",
        "Lifetime of closed stream sessions"
    );
    describe_counter!(
        "ticker_events_sent_total",
        "Total events written to clients by kind"
    );
    describe_counter!(
        "ticker_ticks_skipped_total",
        "Ticks dropped because the snapshot could not be encoded"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The connection acknowledgement.
    Connected,
    /// A tick snapshot.
    Snapshot,
}

impl EventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Record a newly accepted session.
pub fn record_session_opened() {
    counter!("ticker_sessions_opened_total").increment(1);
    gauge!("ticker_sessions_active").increment(1.0);
}

/// Record a session task ending, however it ended.
pub fn record_session_released() {
    gauge!("ticker_sessions_active").decrement(1.0);
}

/// Record a session that closed normally.
pub fn record_session_closed(reason: CloseReason, lifetime: Duration) {
    counter!(
        "ticker_sessions_closed_total",
        "reason" => reason.as_str()
    )
    .increment(1);
    histogram!("ticker_session_duration_seconds").record(lifetime.as_secs_f64());
}

/// Record an event written to a client.
pub fn record_event_sent(kind: EventKind) {
    counter!(
        "ticker_events_sent_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a skipped tick.
pub fn record_tick_skipped() {
    counter!("ticker_ticks_skipped_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
