//! Ticker Configuration Settings
//!
//! Configuration types for the ticker server, loaded from environment
//! variables. Every setting is optional; missing or unparsable values fall
//! back to the defaults below.

use std::time::Duration;

use crate::domain::tick::DEFAULT_CHANGE_HALF_WIDTH;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port serving the landing page and the event stream.
    pub http_port: u16,
    /// Health check and metrics port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Per-session streaming settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Half-width of the uniform per-tick price change.
    pub change_half_width: f64,
    /// Frames buffered between a session and its response body.
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            change_half_width: DEFAULT_CHANGE_HALF_WIDTH,
            channel_capacity: 1,
        }
    }
}

/// Complete ticker configuration.
#[derive(Debug, Clone, Default)]
pub struct TickerConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Streaming settings.
    pub stream: StreamSettings,
}

impl TickerConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let server = ServerSettings {
            http_port: parse_env_u16("TICKER_PORT", ServerSettings::default().http_port),
            health_port: parse_env_u16(
                "TICKER_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            tick_interval: parse_env_duration_millis(
                "TICKER_TICK_INTERVAL_MS",
                defaults.tick_interval,
            ),
            change_half_width: parse_env_f64(
                "TICKER_CHANGE_HALF_WIDTH",
                defaults.change_half_width,
            ),
            channel_capacity: parse_env_usize(
                "TICKER_CHANNEL_CAPACITY",
                defaults.channel_capacity,
            ),
        };

        Self { server, stream }.sanitized()
    }

    /// Replace values the server cannot run with by their defaults.
    ///
    /// A zero tick interval would spin and a zero channel capacity panics in
    /// `tokio::sync::mpsc`. The half-width must be non-negative with a finite
    /// full range width (`2 * half_width`).
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = StreamSettings::default();

        if self.stream.tick_interval.is_zero() {
            self.stream.tick_interval = defaults.tick_interval;
        }
        if self.stream.channel_capacity == 0 {
            self.stream.channel_capacity = defaults.channel_capacity;
        }
        let half_width = self.stream.change_half_width;
        if !(2.0 * half_width).is_finite() || half_width < 0.0 {
            self.stream.change_half_width = defaults.change_half_width;
        }

        self
    }

    /// Whether the health server should be started.
    #[must_use]
    pub const fn health_enabled(&self) -> bool {
        self.server.health_port != 0
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
