//! Infrastructure Layer - Adapters and external integrations.
//!
//! HTTP serving, wire encoding, configuration and observability.

/// Server-Sent Events codec, sessions and server.
pub mod sse;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
