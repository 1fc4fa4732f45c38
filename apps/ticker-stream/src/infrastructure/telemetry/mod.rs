//! Tracing and OpenTelemetry Setup
//!
//! Installs the `tracing` subscriber: a formatted stdout layer filtered by
//! `RUST_LOG`, plus an optional OTLP span exporter.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: ticker-stream)
//!
//! # Usage
//!
//! ```ignore
//! use ticker_stream::infrastructure::telemetry;
//!
//! // Keep the guard alive until the process exits
//! let _guard = telemetry::init();
//! tracing::info!("Starting");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "ticker-stream";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Directives applied on top of `RUST_LOG`.
const DEFAULT_DIRECTIVES: [&str; 3] = ["ticker_stream=info", "tower_http=info", "hyper=warn"];

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether OpenTelemetry export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("OTEL_ENABLED").is_some_and(|v| parse_flag(&v));

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn env_filter() -> EnvFilter {
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

/// Initialize telemetry with configuration from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// If the OTLP exporter cannot be built, logging still starts and the
/// failure is reported once the subscriber is installed.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .init();

        return TelemetryGuard {
            tracer_provider: None,
        };
    }

    let otlp_exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .init();
            tracing::warn!(
                error = %e,
                endpoint = %config.otlp_endpoint,
                "OTLP exporter unavailable, continuing without span export"
            );
            return TelemetryGuard {
                tracer_provider: None,
            };
        }
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}

// =============================================================================
// Tests
// =============================================================================
