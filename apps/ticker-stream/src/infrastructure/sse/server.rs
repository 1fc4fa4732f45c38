//! SSE Server
//!
//! Accepts HTTP connections and hands each event-stream request to its own
//! [`StreamSession`] task.
//!
//! # Endpoints
//!
//! - `GET /` - Landing page
//! - `GET /api/stocks` - Simulated quotes as `text/event-stream`
//!
//! # Disconnect Detection
//!
//! Every stream request gets a cancellation token (a child of the server's
//! shutdown token). The response body owns a drop guard for that token, so
//! when the peer goes away and hyper drops the body, the session's token
//! fires and the session task stops.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, StatusCode, Version, header};
use axum::response::{Html, IntoResponse, Response};
use axum::{Router, routing::get};
use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;

use super::session::StreamSession;
use crate::application::ports::{EventSink, SinkError};
use crate::domain::instrument::SharedInstrumentStore;
use crate::domain::tick::TickGenerator;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

/// Landing page served at `/`.
const INDEX_HTML: &str = include_str!("../../../static/index.html");

// =============================================================================
// Channel Sink
// =============================================================================

/// `EventSink` that hands frames to a response body through a channel.
///
/// Each frame becomes its own body chunk, so hyper writes it out as soon as
/// it is received.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink feeding `tx`.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.send(frame).await.map_err(|_| SinkError::Closed)
    }
}

// =============================================================================
// Session Body
// =============================================================================

/// Response body stream for one session.
///
/// Dropping it cancels the session.
pub struct SessionBody {
    frames: ReceiverStream<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl SessionBody {
    /// Wrap the session's frame receiver; `cancel` fires when the body drops.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) -> Self {
        Self {
            frames: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

impl Stream for SessionBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}

// =============================================================================
// Session Counters
// =============================================================================

/// Live and lifetime session counts.
#[derive(Debug, Default)]
pub struct SessionCounters {
    active: AtomicUsize,
    total: AtomicU64,
}

impl SessionCounters {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Count a newly accepted session.
    ///
    /// The session stays active until the returned guard is dropped.
    #[must_use]
    pub fn open(self: &Arc<Self>) -> ActiveSession {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::record_session_opened();

        ActiveSession {
            counters: Arc::clone(self),
        }
    }

    /// Sessions currently streaming.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions accepted since startup.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Keeps one session counted as active while alive.
#[derive(Debug)]
pub struct ActiveSession {
    counters: Arc<SessionCounters>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        metrics::record_session_released();
    }
}

/// Run a session future on its own task, holding `active` until the task
/// finishes or unwinds.
fn spawn_session<F>(active: ActiveSession, session: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        let _active = active;
        session.await
    })
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the stream endpoints.
#[derive(Debug)]
pub struct StreamServerState {
    store: SharedInstrumentStore,
    settings: StreamSettings,
    sessions: Arc<SessionCounters>,
    shutdown: CancellationToken,
}

impl StreamServerState {
    /// Create new server state.
    ///
    /// Sessions are cancelled when `shutdown` fires.
    #[must_use]
    pub fn new(
        store: SharedInstrumentStore,
        settings: StreamSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            settings,
            sessions: Arc::new(SessionCounters::new()),
            shutdown,
        }
    }

    /// Session counters, shared with the health server.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.sessions)
    }

    /// The instrument store.
    #[must_use]
    pub fn store(&self) -> SharedInstrumentStore {
        Arc::clone(&self.store)
    }
}

/// Shared server state reference.
pub type SharedStreamServerState = Arc<StreamServerState>;

/// Create the router with the landing page and stream endpoint.
#[must_use]
pub fn create_router(state: SharedStreamServerState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/stocks", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn stream_handler(
    State(state): State<SharedStreamServerState>,
    version: Version,
    extensions: Extensions,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    // HTTP/1.0 has no chunked transfer encoding to carry an open-ended stream.
    if version == Version::HTTP_09 || version == Version::HTTP_10 {
        tracing::warn!(?version, peer = ?peer, "Rejecting stream request: streaming unsupported");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Streaming unsupported").into_response();
    }

    let cancel = state.shutdown.child_token();
    let (tx, rx) = mpsc::channel(state.settings.channel_capacity);

    let session = StreamSession::new(
        ChannelSink::new(tx),
        Arc::clone(&state.store),
        TickGenerator::from_os_rng(state.settings.change_half_width),
        state.settings.tick_interval,
        cancel.clone(),
    );
    tracing::debug!(session_id = %session.id(), peer = ?peer, "Stream session accepted");

    spawn_session(state.sessions.open(), session.run());

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(SessionBody::new(rx, cancel)),
    )
        .into_response()
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for the landing page and event stream.
pub struct StreamServer {
    listener: TcpListener,
    state: SharedStreamServerState,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        state: SharedStreamServerState,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        Ok(Self {
            listener,
            state,
            cancel,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Io)
    }

    /// Serve connections until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` if the server fails while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = create_router(self.state);

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(addr = %addr, "Stream server listening");
        }

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.cancel.cancelled_owned())
        .await
        .map_err(ServerError::Io)?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, #[source] std::io::Error),

    /// I/O error while serving.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================
