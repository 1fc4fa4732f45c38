//! Domain Layer - Simulated market state and tick generation.
//!
//! Pure types with no transport concerns: the instrument store shared by all
//! sessions and the generator that advances it one tick at a time.

/// Instrument state store.
pub mod instrument;

/// Snapshot types, rounding and the tick generator.
pub mod tick;
