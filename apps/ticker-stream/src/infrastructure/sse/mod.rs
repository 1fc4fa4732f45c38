//! Server-Sent Events Streaming
//!
//! Wire codec, per-connection session loop, and the HTTP acceptor.

/// `data:` framing and JSON encoding of stream events.
pub mod codec;

/// Per-connection stream session state machine.
pub mod session;

/// HTTP routes, handshake and session hand-off.
pub mod server;
