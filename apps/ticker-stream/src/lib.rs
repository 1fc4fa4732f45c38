#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Ticker Stream - Simulated Market Data over Server-Sent Events
//!
//! An HTTP server that pushes a simulated stock ticker to browsers. Every
//! client on `/api/stocks` gets its own session: a connection event, then a
//! snapshot of all instruments every tick until the client goes away or the
//! server shuts down.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Simulated market state
//!   - `instrument`: Instrument store shared by every session
//!   - `tick`: Quote types, two-decimal truncation and the tick generator
//!
//! - **Application**: Port definitions
//!   - `ports`: Event sink the sessions write frames to
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `sse`: Event-stream codec, per-client sessions and the HTTP server
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics HTTP endpoint
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────────┐
//!            ┌──────────►│ InstrumentStore  │◄──────────┐
//!            │ advance   └──────────────────┘  advance  │
//!   ┌────────┴────────┐                       ┌────────┴────────┐
//!   │ StreamSession 1 │   ...one per client   │ StreamSession N │
//!   └────────┬────────┘                       └────────┬────────┘
//!            │ SSE frames                              │ SSE frames
//!            ▼                                         ▼
//!        Client 1                                  Client N
//! ```
//!
//! Sessions never coordinate: two sessions may read the same price and
//! both write their own successor, in which case the last write wins.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market state and tick generation.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    DEFAULT_INSTRUMENTS, Instrument, InstrumentStore, SharedInstrumentStore, StoreError,
};
pub use domain::tick::{Clock, LocalClock, StockQuote, StockUpdate, TickGenerator, round2};

// Ports
pub use application::ports::{EventSink, SinkError};

// Infrastructure config
pub use infrastructure::config::{ServerSettings, StreamSettings, TickerConfig};

// SSE server (for integration tests)
pub use infrastructure::sse::{
    codec::{CONNECTED_FRAME, CodecError, EventEncoder, SseCodec},
    server::{
        ChannelSink, ServerError, SessionBody, SessionCounters, SharedStreamServerState,
        StreamServer, StreamServerState, create_router,
    },
    session::{CloseReason, SessionState, SessionSummary, StreamSession},
};

// Health server
pub use infrastructure::health::{
    HealthServer, HealthServerError, HealthServerState, create_health_router,
};

// Metrics
pub use infrastructure::metrics::{EventKind as MetricsEventKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
