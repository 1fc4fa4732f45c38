//! Application Layer - Port definitions.
//!
//! Interfaces the streaming core depends on, implemented by the
//! infrastructure layer.

/// Port interfaces for client transports.
pub mod ports;
