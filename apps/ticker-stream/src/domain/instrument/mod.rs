//! Instrument State Store
//!
//! Holds the current simulated price and base volume for every tracked
//! instrument. The store is created once at startup and shared by every
//! stream session for the lifetime of the process.
//!
//! # Concurrency
//!
//! Sessions read and write prices without any coordination. Each price is an
//! individually atomic 64-bit cell, so a reader never sees a torn value, but
//! a tick's read-compute-write is not atomic: two sessions ticking at the
//! same time can overwrite each other's update. Simulated prices are
//! best-effort; no lock serializes sessions.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Instruments registered by default, in registration order.
///
/// `(symbol, initial price, base volume)`
pub const DEFAULT_INSTRUMENTS: [(&str, f64, u64); 6] = [
    ("AAPL", 178.50, 50_000_000),
    ("GOOGL", 142.30, 25_000_000),
    ("MSFT", 405.20, 30_000_000),
    ("AMZN", 175.80, 45_000_000),
    ("TSLA", 248.90, 80_000_000),
    ("META", 485.30, 20_000_000),
];

/// A tracked simulated instrument.
#[derive(Debug)]
pub struct Instrument {
    symbol: String,
    price_bits: AtomicU64,
    base_volume: u64,
}

impl Instrument {
    /// Create a new instrument.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, base_volume: u64) -> Self {
        Self {
            symbol: symbol.into(),
            price_bits: AtomicU64::new(price.to_bits()),
            base_volume,
        }
    }

    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current (unrounded) price.
    #[must_use]
    pub fn price(&self) -> f64 {
        f64::from_bits(self.price_bits.load(Ordering::Relaxed))
    }

    /// Base volume that per-tick volume is simulated on top of.
    #[must_use]
    pub const fn base_volume(&self) -> u64 {
        self.base_volume
    }

    fn set_price(&self, price: f64) {
        self.price_bits.store(price.to_bits(), Ordering::Relaxed);
    }
}

/// Process-wide store of simulated instrument state.
#[derive(Debug)]
pub struct InstrumentStore {
    instruments: Vec<Instrument>,
}

/// Shared store reference.
pub type SharedInstrumentStore = Arc<InstrumentStore>;

impl InstrumentStore {
    /// Build a store from `(symbol, price, base volume)` entries.
    ///
    /// Registration order is preserved and is the order of every snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateSymbol` if a symbol appears twice.
    pub fn new<S, I>(entries: I) -> Result<Self, StoreError>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f64, u64)>,
    {
        let mut seen = HashSet::new();
        let mut instruments = Vec::new();

        for (symbol, price, base_volume) in entries {
            let symbol = symbol.into();
            if !seen.insert(symbol.clone()) {
                return Err(StoreError::DuplicateSymbol(symbol));
            }
            instruments.push(Instrument::new(symbol, price, base_volume));
        }

        Ok(Self { instruments })
    }

    /// Build the store with the default instrument set.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            instruments: DEFAULT_INSTRUMENTS
                .iter()
                .map(|&(symbol, price, volume)| Instrument::new(symbol, price, volume))
                .collect(),
        }
    }

    /// Current state of every instrument, in registration order.
    #[must_use]
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Number of registered instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the store tracks no instruments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Look up an instrument by symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    /// Write a new price for `symbol`.
    ///
    /// The value is stored as given; negative or NaN prices are not rejected.
    pub fn advance(&self, symbol: &str, new_price: f64) {
        match self.get(symbol) {
            Some(instrument) => instrument.set_price(new_price),
            None => tracing::warn!(symbol, "Advance for unknown instrument ignored"),
        }
    }
}

impl Default for InstrumentStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Instrument store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The same symbol was registered twice.
    #[error("duplicate instrument symbol: {0}")]
    DuplicateSymbol(String),
}

// =============================================================================
// Tests
// =============================================================================
