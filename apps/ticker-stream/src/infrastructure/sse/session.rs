//! Stream Session
//!
//! One session per client connection. A session writes the connected event,
//! then on every tick generates a snapshot, encodes it and writes it, until
//! its cancellation token fires or the transport goes away.
//!
//! ```text
//! Handshaking ──connected event flushed──► Streaming ──cancel / write error──► Closed
//!      │                                                                          ▲
//!      └──────────────────────── write error / cancel ───────────────────────────┘
//! ```
//!
//! Both suspension points, the tick wait and the write, race the cancellation
//! token, so a disconnect is observed within one tick interval at worst and
//! no write is attempted after it.

use std::fmt;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use rand::Rng;
use rand::rngs::StdRng;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::{EventEncoder, SseCodec};
use crate::application::ports::EventSink;
use crate::domain::instrument::SharedInstrumentStore;
use crate::domain::tick::{Clock, LocalClock, TickGenerator};
use crate::infrastructure::metrics::{self, EventKind};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted; the connected event has not been flushed yet.
    Handshaking,
    /// Emitting one snapshot per tick.
    Streaming,
    /// Terminal. No further writes.
    Closed,
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection's cancellation token fired (peer gone or shutdown).
    Cancelled,
    /// A write failed because the transport is closed.
    TransportClosed,
}

impl CloseReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::TransportClosed => "transport_closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session ID.
    pub id: Uuid,
    /// State the session was in when it closed.
    pub closed_from: SessionState,
    /// Why it closed.
    pub reason: CloseReason,
    /// Events written, including the connected event.
    pub events_sent: u64,
    /// Ticks dropped because the snapshot could not be encoded.
    pub ticks_skipped: u64,
}

/// A single client's streaming session.
pub struct StreamSession<S, R = StdRng, C = LocalClock, E = SseCodec> {
    id: Uuid,
    sink: S,
    store: SharedInstrumentStore,
    generator: TickGenerator<R, C>,
    codec: E,
    tick_interval: Duration,
    cancel: CancellationToken,
    state: SessionState,
    events_sent: u64,
    ticks_skipped: u64,
}

impl<S, R, C> StreamSession<S, R, C>
where
    S: EventSink,
    R: Rng + Send,
    C: Clock,
{
    /// Create a session in the `Handshaking` state, framing events with
    /// [`SseCodec`].
    #[must_use]
    pub fn new(
        sink: S,
        store: SharedInstrumentStore,
        generator: TickGenerator<R, C>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_codec(sink, store, generator, SseCodec::new(), tick_interval, cancel)
    }
}

impl<S, R, C, E> StreamSession<S, R, C, E>
where
    S: EventSink,
    R: Rng + Send,
    C: Clock,
    E: EventEncoder,
{
    /// Create a session in the `Handshaking` state with a custom encoder.
    #[must_use]
    pub fn with_codec(
        sink: S,
        store: SharedInstrumentStore,
        generator: TickGenerator<R, C>,
        codec: E,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sink,
            store,
            generator,
            codec,
            tick_interval,
            cancel,
            state: SessionState::Handshaking,
            events_sent: 0,
            ticks_skipped: 0,
        }
    }

    /// Session ID.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes.
    pub async fn run(mut self) -> SessionSummary {
        let started_at = Instant::now();
        tracing::info!(session_id = %self.id, "Client connected");

        let connected = self.codec.connected();
        if let Err(reason) = self.write(connected, EventKind::Connected).await {
            return self.close(reason, started_at);
        }

        self.state = SessionState::Streaming;
        let mut ticker = self.ticker();

        loop {
            let cancelled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => true,
                _ = ticker.tick() => false,
            };
            if cancelled {
                return self.close(CloseReason::Cancelled, started_at);
            }

            if let Err(reason) = self.tick().await {
                return self.close(reason, started_at);
            }
        }
    }

    /// Interval whose first tick lands one period after the connected event.
    fn ticker(&self) -> Interval {
        let start = tokio::time::Instant::now() + self.tick_interval;
        let mut ticker = tokio::time::interval_at(start, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn tick(&mut self) -> Result<(), CloseReason> {
        let update = self.generator.next(&self.store);

        match self.codec.encode(&update) {
            Ok(frame) => self.write(frame, EventKind::Snapshot).await,
            Err(e) => {
                self.ticks_skipped += 1;
                metrics::record_tick_skipped();
                tracing::warn!(session_id = %self.id, error = %e, "Failed to encode snapshot, skipping tick");
                Ok(())
            }
        }
    }

    async fn write(&mut self, frame: Bytes, kind: EventKind) -> Result<(), CloseReason> {
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.sink.send(frame) => Some(result),
        };

        match outcome {
            None => Err(CloseReason::Cancelled),
            Some(Err(e)) => {
                tracing::debug!(session_id = %self.id, error = %e, "Write failed");
                Err(CloseReason::TransportClosed)
            }
            Some(Ok(())) => {
                self.events_sent += 1;
                metrics::record_event_sent(kind);
                Ok(())
            }
        }
    }

    fn close(mut self, reason: CloseReason, started_at: Instant) -> SessionSummary {
        let closed_from = self.state;
        self.state = SessionState::Closed;

        let elapsed = started_at.elapsed();
        metrics::record_session_closed(reason, elapsed);
        tracing::info!(
            session_id = %self.id,
            reason = %reason,
            events_sent = self.events_sent,
            ticks_skipped = self.ticks_skipped,
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Client disconnected"
        );

        SessionSummary {
            id: self.id,
            closed_from,
            reason,
            events_sent: self.events_sent,
            ticks_skipped: self.ticks_skipped,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mockall::Sequence;
    use serde::ser::Error as _;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::tick::StockUpdate;
    use crate::infrastructure::sse::codec::{CONNECTED_FRAME, CodecError};
    use crate::application::ports::{MockEventSink, SinkError};
    use crate::domain::instrument::InstrumentStore;
    use crate::domain::tick::{DEFAULT_CHANGE_HALF_WIDTH, FixedClock};
    use crate::infrastructure::sse::server::ChannelSink;

    const TICK: Duration = Duration::from_millis(500);

    fn generator() -> TickGenerator<StdRng, FixedClock> {
        TickGenerator::seeded(3, FixedClock("11:00:00".to_string()), DEFAULT_CHANGE_HALF_WIDTH)
    }

    fn session_with<S: EventSink>(
        sink: S,
        cancel: CancellationToken,
    ) -> StreamSession<S, StdRng, FixedClock> {
        StreamSession::new(
            sink,
            Arc::new(InstrumentStore::with_defaults()),
            generator(),
            TICK,
            cancel,
        )
    }

    fn channel_session(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (
        StreamSession<ChannelSink, StdRng, FixedClock>,
        mpsc::Receiver<Bytes>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        (session_with(ChannelSink::new(tx), cancel), rx)
    }

    #[test]
    fn new_session_is_handshaking() {
        let (session, _rx) = channel_session(1, CancellationToken::new());
        assert_eq!(session.state(), SessionState::Handshaking);
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::Cancelled.as_str(), "cancelled");
        assert_eq!(CloseReason::TransportClosed.to_string(), "transport_closed");
    }

    #[tokio::test(start_paused = true)]
    async fn connected_event_precedes_first_tick() {
        let cancel = CancellationToken::new();
        let (session, mut rx) = channel_session(8, cancel.clone());
        let handle = tokio::spawn(session.run());

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Bytes::from_static(b"data: {\"status\":\"connected\"}\n\n"));
        let connected_at = tokio::time::Instant::now();

        let second = rx.recv().await.unwrap();
        assert!(second.starts_with(b"data: {\"stocks\":["));
        assert_eq!(connected_at.elapsed(), TICK);

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.closed_from, SessionState::Streaming);
        assert_eq!(summary.events_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval() {
        let cancel = CancellationToken::new();
        let (session, mut rx) = channel_session(8, cancel.clone());
        let handle = tokio::spawn(session.run());

        rx.recv().await.unwrap();
        let start = tokio::time::Instant::now();
        for n in 1..=4u32 {
            rx.recv().await.unwrap();
            assert_eq!(start.elapsed(), TICK * n);
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap().events_sent, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_emits_nothing_more() {
        let cancel = CancellationToken::new();
        let (session, mut rx) = channel_session(8, cancel.clone());
        let handle = tokio::spawn(session.run());

        rx.recv().await.unwrap();
        tokio::time::sleep(TICK / 2).await;
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.events_sent, 1);

        // Sender dropped with the session; nothing else was queued.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_wait_closes_within_one_interval() {
        let cancel = CancellationToken::new();
        let (session, mut rx) = channel_session(8, cancel.clone());
        let handle = tokio::spawn(session.run());

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        tokio::time::sleep(TICK / 5).await;
        let cancelled_at = tokio::time::Instant::now();
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert!(cancelled_at.elapsed() < TICK);
        assert_eq!(summary.events_sent, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_blocked_write() {
        let cancel = CancellationToken::new();
        // Capacity 1 and nobody reading: the first snapshot write blocks.
        let (session, rx) = channel_session(1, cancel.clone());
        let handle = tokio::spawn(session.run());

        tokio::time::sleep(TICK * 3).await;
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.events_sent, 1);
        drop(rx);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_session_never_streams() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (session, mut rx) = channel_session(8, cancel);

        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.closed_from, SessionState::Handshaking);
        assert_eq!(summary.events_sent, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_closes_session() {
        let (session, rx) = channel_session(8, CancellationToken::new());
        drop(rx);

        let summary = session.run().await;
        assert_eq!(summary.reason, CloseReason::TransportClosed);
        assert_eq!(summary.closed_from, SessionState::Handshaking);
        assert_eq!(summary.events_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_while_streaming_closes_session() {
        let mut sink = MockEventSink::new();
        let mut seq = Sequence::new();
        sink.expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SinkError::Closed));

        let summary = session_with(sink, CancellationToken::new()).run().await;
        assert_eq!(summary.reason, CloseReason::TransportClosed);
        assert_eq!(summary.closed_from, SessionState::Streaming);
        assert_eq!(summary.events_sent, 2);
    }

    /// Encoder that rejects chosen snapshot calls (1-based) and frames the rest.
    struct FlakyCodec {
        fail_on: Vec<usize>,
        calls: AtomicUsize,
    }

    impl FlakyCodec {
        fn failing_on(fail_on: &[usize]) -> Self {
            Self {
                fail_on: fail_on.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EventEncoder for FlakyCodec {
        fn connected(&self) -> Bytes {
            SseCodec::new().connected()
        }

        fn encode(&self, update: &StockUpdate) -> Result<Bytes, CodecError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if self.fail_on.contains(&call) {
                return Err(CodecError::Json(serde_json::Error::custom("unencodable")));
            }
            SseCodec::new().encode(update)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn encode_failure_skips_tick_and_keeps_streaming() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let session = StreamSession::with_codec(
            ChannelSink::new(tx),
            Arc::new(InstrumentStore::with_defaults()),
            generator(),
            FlakyCodec::failing_on(&[1]),
            TICK,
            cancel.clone(),
        );
        let handle = tokio::spawn(session.run());

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Bytes::from_static(CONNECTED_FRAME.as_bytes()));
        let connected_at = tokio::time::Instant::now();

        // The first tick produced nothing; the next frame is the second tick.
        let second = rx.recv().await.unwrap();
        assert!(second.starts_with(b"data: {\"stocks\":["));
        assert_eq!(connected_at.elapsed(), TICK * 2);

        rx.recv().await.unwrap();
        assert_eq!(connected_at.elapsed(), TICK * 3);

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.closed_from, SessionState::Streaming);
        assert_eq!(summary.ticks_skipped, 1);
        assert_eq!(summary.events_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_failing_still_honours_cancel() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let session = StreamSession::with_codec(
            ChannelSink::new(tx),
            Arc::new(InstrumentStore::with_defaults()),
            generator(),
            FlakyCodec::failing_on(&[1, 2, 3, 4]),
            TICK,
            cancel.clone(),
        );
        let handle = tokio::spawn(session.run());

        rx.recv().await.unwrap();
        tokio::time::sleep(TICK * 4 + TICK / 2).await;
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.ticks_skipped, 4);
        assert_eq!(summary.events_sent, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_advance_the_shared_store() {
        let store = Arc::new(InstrumentStore::with_defaults());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let session = StreamSession::new(
            ChannelSink::new(tx),
            Arc::clone(&store),
            generator(),
            TICK,
            cancel.clone(),
        );
        let handle = tokio::spawn(session.run());

        rx.recv().await.unwrap();
        let frame = rx.recv().await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let text = std::str::from_utf8(&frame).unwrap();
        let json = &text["data: ".len()..text.len() - 2];
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        let stocks = value["stocks"].as_array().unwrap();
        assert_eq!(stocks.len(), store.len());

        for (stock, instrument) in stocks.iter().zip(store.instruments()) {
            assert_eq!(stock["symbol"], instrument.symbol());
            assert_eq!(
                stock["price"].as_f64().unwrap(),
                crate::domain::tick::round2(instrument.price())
            );
        }
    }
}
