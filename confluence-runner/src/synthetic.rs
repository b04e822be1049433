//! Synthetic bar history for demos and tests.
//!
//! Each (symbol, timeframe) gets a random walk seeded from BLAKE3 of
//! `"{symbol}/{timeframe}"`, so repeated fetches agree bar for bar. The walk starts
//! at `anchor` and runs up to the clock; when the clock sits inside an interval the
//! newest bar is returned open. The walk alternates drift regimes so that trends,
//! pullbacks and ranges all show up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use confluence_core::domain::{Bar, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::provider::{BarHistory, FetchError};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SyntheticBarHistory {
    anchor: DateTime<Utc>,
    clock: Clock,
}

impl SyntheticBarHistory {
    /// Walk from `anchor` up to the wall clock.
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            clock: Arc::new(Utc::now),
        }
    }

    /// Walk from `anchor` up to a fixed instant.
    pub fn fixed(anchor: DateTime<Utc>, as_of: DateTime<Utc>) -> Self {
        Self {
            anchor,
            clock: Arc::new(move || as_of),
        }
    }

    pub fn with_clock(anchor: DateTime<Utc>, clock: Clock) -> Self {
        Self { anchor, clock }
    }

    fn generate(&self, symbol: &str, timeframe: Timeframe, as_of: DateTime<Utc>) -> Vec<Bar> {
        let interval = timeframe.duration();
        let elapsed = as_of - self.anchor;
        if elapsed <= chrono::Duration::zero() {
            return Vec::new();
        }
        let closed = (elapsed.num_seconds() / interval.num_seconds()) as usize;
        let has_open = elapsed.num_seconds() % interval.num_seconds() != 0;
        let total = closed + usize::from(has_open);

        let seed_bytes = blake3::hash(format!("{symbol}/{timeframe}").as_bytes());
        let mut rng = StdRng::from_seed(*seed_bytes.as_bytes());

        // Volatility scales with the interval so higher timeframes move more per bar.
        let vol = 0.002 * (interval.num_minutes() as f64 / 15.0).sqrt().max(0.25);
        let mut price = 100.0_f64;
        let mut drift = 0.0_f64;
        let mut regime_left = 0_u32;
        let mut bars = Vec::with_capacity(total);

        for i in 0..total {
            if regime_left == 0 {
                regime_left = rng.gen_range(15..60);
                drift = match rng.gen_range(0..3) {
                    0 => vol * 0.6,
                    1 => -vol * 0.6,
                    _ => 0.0,
                };
            }
            regime_left -= 1;

            let change: f64 = drift + rng.gen_range(-vol..vol);
            let open = price;
            let close = (price * (1.0 + change)).max(0.01);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..vol));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..vol));
            let volume = rng.gen_range(1_000.0..50_000.0_f64).round();

            let mut bar = Bar::new(
                self.anchor + interval * i as i32,
                timeframe,
                open,
                high,
                low,
                close,
                volume,
            );
            bar.is_closed = i < closed;
            bars.push(bar);
            price = close;
        }
        bars
    }
}

impl BarHistory for SyntheticBarHistory {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, FetchError> {
        if symbol.trim().is_empty() {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let mut bars = self.generate(symbol, timeframe, (self.clock)());
        let skip = bars.len().saturating_sub(count);
        bars.drain(..skip);
        Ok(bars)
    }
}
