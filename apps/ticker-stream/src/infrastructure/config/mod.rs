//! Configuration Module
//!
//! Environment-driven configuration for the ticker server.

mod settings;

pub use settings::{ServerSettings, StreamSettings, TickerConfig};
