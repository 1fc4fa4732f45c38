//! Port Interfaces
//!
//! Contracts between the streaming core and the client transport. The
//! session loop only talks to these traits; infrastructure provides the
//! adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventSink`: Writes one framed event to a client connection and flushes it

use async_trait::async_trait;
use axum::body::Bytes;

/// Transport errors raised while writing to a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The peer is gone; nothing further can be written.
    #[error("client connection closed")]
    Closed,
}

/// Outbound connection to one client.
///
/// Each call writes a complete event and flushes it; implementations must not
/// hold events back to batch them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send {
    /// Write and flush one framed event.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Closed` when the client can no longer be written to.
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkError>;
}
