//! Event Stream Codec
//!
//! Frames payloads for the `text/event-stream` wire format:
//!
//! ```text
//! data: {"status":"connected"}\n
//! \n
//! data: {"stocks":[{"symbol":"AAPL","price":178.61,...}, ...]}\n
//! \n
//! ```
//!
//! Each event is a single `data:` line holding one JSON document, terminated
//! by a blank line.

use axum::body::Bytes;
use serde::Serialize;

use crate::domain::tick::StockUpdate;

/// Field prefix of a data line.
const DATA_PREFIX: &str = "data: ";

/// Event terminator (end of the data line plus the blank line).
const EVENT_TERMINATOR: &str = "\n\n";

/// The first event every session sends.
pub const CONNECTED_FRAME: &str = "data: {\"status\":\"connected\"}\n\n";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns session events into wire frames.
pub trait EventEncoder: Send {
    /// The connection acknowledgement event.
    fn connected(&self) -> Bytes;

    /// Encode one tick's snapshot as an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded; the tick is skipped.
    fn encode(&self, update: &StockUpdate) -> Result<Bytes, CodecError>;
}

/// JSON-over-SSE codec for stream events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SseCodec;

impl SseCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The connection acknowledgement event.
    #[must_use]
    pub const fn connected(&self) -> Bytes {
        Bytes::from_static(CONNECTED_FRAME.as_bytes())
    }

    /// Encode one tick's snapshot as an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized.
    pub fn encode(&self, update: &StockUpdate) -> Result<Bytes, CodecError> {
        self.encode_payload(update)
    }

    /// Encode any serializable payload as a single `data:` event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn encode_payload<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Bytes, CodecError> {
        let json = serde_json::to_string(payload)?;

        let mut frame =
            String::with_capacity(DATA_PREFIX.len() + json.len() + EVENT_TERMINATOR.len());
        frame.push_str(DATA_PREFIX);
        frame.push_str(&json);
        frame.push_str(EVENT_TERMINATOR);

        Ok(Bytes::from(frame))
    }
}

impl EventEncoder for SseCodec {
    fn connected(&self) -> Bytes {
        Self::connected(self)
    }

    fn encode(&self, update: &StockUpdate) -> Result<Bytes, CodecError> {
        Self::encode(self, update)
    }
}

// =============================================================================
// Tests
// =============================================================================
