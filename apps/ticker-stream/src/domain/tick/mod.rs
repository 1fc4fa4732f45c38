//! Tick Generation
//!
//! Produces one snapshot of simulated quotes per tick and writes the new
//! prices back into the [`InstrumentStore`], so the store always reflects
//! the most recently emitted tick.
//!
//! # Price Model
//!
//! For each instrument, in registration order:
//!
//! ```text
//! change         = uniform(-half_width, +half_width)
//! new_price      = price + change
//! change_percent = change / price * 100        (pre-tick price)
//! volume         = base_volume + uniform(0, 10_000_000)
//! ```
//!
//! Price, change and percentage are truncated toward zero at the hundredths
//! digit (see [`round2`]). The store keeps the unrounded price.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::domain::instrument::{Instrument, InstrumentStore};

/// Default half-width of the uniform per-tick price change.
pub const DEFAULT_CHANGE_HALF_WIDTH: f64 = 2.5;

/// Exclusive upper bound of the volume added on top of the base volume.
pub const VOLUME_SPREAD: u64 = 10_000_000;

// =============================================================================
// Snapshot Types
// =============================================================================

/// One instrument's observation within a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuote {
    /// Instrument symbol.
    pub symbol: String,
    /// Price after this tick, truncated to 2 decimal places.
    pub price: f64,
    /// Absolute change since the previous tick, truncated to 2 decimal places.
    pub change: f64,
    /// Change as a percentage of the pre-tick price, truncated to 2 decimal places.
    pub change_percent: f64,
    /// Simulated volume for this tick.
    pub volume: u64,
    /// Server-local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
}

/// Snapshot produced by one tick, in store registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockUpdate {
    /// One quote per registered instrument.
    pub stocks: Vec<StockQuote>,
}

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source for observation timestamps.
pub trait Clock: Send + Sync {
    /// Current time formatted as `HH:MM:SS`.
    fn now_hms(&self) -> String;
}

/// Server-local system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now_hms(&self) -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }
}

/// Clock that always reports the same time.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_hms(&self) -> String {
        self.0.clone()
    }
}

// =============================================================================
// Rounding
// =============================================================================

/// Truncate `value` toward zero at the hundredths digit.
///
/// `round2(1.239) == 1.23` and `round2(-1.239) == -1.23` (not `-1.24`).
/// Truncation works on the shortest decimal form of the float, so values
/// already at two places are left alone and `round2(round2(x)) == round2(x)`.
/// NaN, infinities and magnitudes beyond the decimal range pass through.
#[must_use]
pub fn round2(value: f64) -> f64 {
    let Ok(decimal) = Decimal::from_str(&value.to_string()) else {
        return value;
    };

    let truncated = decimal
        .round_dp_with_strategy(2, RoundingStrategy::ToZero)
        .to_string()
        .parse::<f64>()
        .unwrap_or(value);

    // -0.00 serializes as "-0.0"
    if truncated == 0.0 { 0.0 } else { truncated }
}

// =============================================================================
// Tick Generator
// =============================================================================

/// Random draws for one instrument in one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    /// Price change.
    pub change: f64,
    /// Volume added on top of the base volume.
    pub extra_volume: u64,
}

/// Generates snapshots and advances the instrument store.
#[derive(Debug)]
pub struct TickGenerator<R = StdRng, C = LocalClock> {
    rng: R,
    clock: C,
    change_half_width: f64,
}

impl TickGenerator {
    /// Generator seeded from the OS, stamping with the local clock.
    #[must_use]
    pub fn from_os_rng(change_half_width: f64) -> Self {
        Self::new(StdRng::from_os_rng(), LocalClock, change_half_width)
    }
}

impl<C: Clock> TickGenerator<StdRng, C> {
    /// Deterministic generator for a fixed seed.
    #[must_use]
    pub fn seeded(seed: u64, clock: C, change_half_width: f64) -> Self {
        Self::new(StdRng::seed_from_u64(seed), clock, change_half_width)
    }
}

impl<R: Rng, C: Clock> TickGenerator<R, C> {
    /// Create a generator from an RNG and clock.
    #[must_use]
    pub const fn new(rng: R, clock: C, change_half_width: f64) -> Self {
        Self {
            rng,
            clock,
            change_half_width,
        }
    }

    /// Produce the next snapshot and write the new prices back into `store`.
    pub fn next(&mut self, store: &InstrumentStore) -> StockUpdate {
        let stocks = store
            .instruments()
            .iter()
            .map(|instrument| {
                let movement = self.draw();
                let (quote, new_price) = observe(instrument, movement, self.clock.now_hms());
                store.advance(instrument.symbol(), new_price);
                quote
            })
            .collect();

        StockUpdate { stocks }
    }

    fn draw(&mut self) -> Movement {
        let half_width = self.change_half_width;
        // Scaling a unit draw keeps the range width finite for any finite half-width.
        let change = if half_width > 0.0 && half_width.is_finite() {
            self.rng.random_range(-1.0..1.0) * half_width
        } else {
            0.0
        };

        Movement {
            change,
            extra_volume: self.rng.random_range(0..VOLUME_SPREAD),
        }
    }
}

/// Apply one movement to an instrument's current state.
///
/// Returns the observation and the unrounded new price.
#[must_use]
pub fn observe(instrument: &Instrument, movement: Movement, timestamp: String) -> (StockQuote, f64) {
    let price = instrument.price();
    let new_price = price + movement.change;
    let change_percent = movement.change / price * 100.0;

    let quote = StockQuote {
        symbol: instrument.symbol().to_string(),
        price: round2(new_price),
        change: round2(movement.change),
        change_percent: round2(change_percent),
        volume: instrument.base_volume().saturating_add(movement.extra_volume),
        timestamp,
    };

    (quote, new_price)
}

// =============================================================================
// Tests
// =============================================================================
