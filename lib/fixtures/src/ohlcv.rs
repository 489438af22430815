//! Seeded OHLCV (open/high/low/close/volume) bar generation.
//!
//! Every test workspace the sandbox materializes uses `seed = 42`
//! (§4.4 step 1); the determinism re-run depends on this generator producing
//! byte-identical bars given the same seed, symbol, and bar count, which
//! `rand::rngs::StdRng` guarantees since it is a fixed, versioned algorithm
//! rather than the platform's default RNG.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// The fixed seed every sandboxed test run is generated and re-run with.
pub const DETERMINISTIC_SEED: u64 = 42;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Generates `bars` consecutive OHLCV bars for `symbol`, starting at
/// `start` and spaced `interval` apart, as a seeded random walk.
///
/// The same `(seed, symbol, bars, start, interval)` always produces the
/// same sequence of bars, which is what the determinism check in §4.4
/// step 6 relies on.
#[must_use]
pub fn generate_ohlcv(
    seed: u64,
    symbol: &str,
    bars: usize,
    start: DateTime<Utc>,
    interval: ChronoDuration,
) -> Vec<OhlcvBar> {
    // Mix the symbol into the seed so distinct symbols in the same test
    // don't walk identical price paths, while remaining fully deterministic.
    let symbol_mix = symbol.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    let mut rng = StdRng::seed_from_u64(seed ^ symbol_mix);

    let mut close = 100.0f64;
    let mut out = Vec::with_capacity(bars);
    for i in 0..bars {
        let drift: f64 = rng.gen_range(-1.0..1.0);
        let open = close;
        close = (open + drift).max(0.01);
        let high = open.max(close) + rng.gen_range(0.0..0.5);
        let low = open.min(close) - rng.gen_range(0.0..0.5);
        let volume = rng.gen_range(100.0..10_000.0);

        out.push(OhlcvBar {
            timestamp: start + interval * i32::try_from(i).unwrap_or(i32::MAX),
            open,
            high,
            low: low.max(0.01),
            close,
            volume,
        });
    }
    out
}
