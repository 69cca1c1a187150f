// =============================================================================
// Rolling Statistics — bounded-window accumulator per instrument
// =============================================================================
//
// Three fixed-capacity FIFO windows: the last N candles, their per-candle
// OHLC means (kept in lockstep), and the last M trades. Append at the tail,
// evict at the head, nothing else.
//
// Candle/price math uses `rust_decimal` so that repeated means do not drift
// the way f64 accumulation would.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;

use crate::types::{Candle, Trade};

/// Per-instrument rolling window statistics.
///
/// Mutated only by the ingestion path; the volume monitor and alert
/// evaluation read it through the registry's per-instrument lock.
#[derive(Debug)]
pub struct RollingStatistics {
    last_candles: VecDeque<Candle>,
    last_candle_means: VecDeque<Decimal>,
    last_trades: VecDeque<Trade>,
    candles_capacity: usize,
    trades_capacity: usize,
}

impl RollingStatistics {
    /// Create an empty accumulator with the given window capacities.
    pub fn new(candles_capacity: usize, trades_capacity: usize) -> Self {
        Self {
            last_candles: VecDeque::with_capacity(candles_capacity + 1),
            last_candle_means: VecDeque::with_capacity(candles_capacity + 1),
            last_trades: VecDeque::with_capacity(trades_capacity + 1),
            candles_capacity,
            trades_capacity,
        }
    }

    /// Observe one candle: append it (evicting the oldest at capacity),
    /// record its OHLC mean in lockstep, and return that mean.
    ///
    /// A degenerate all-zero candle yields a mean of zero.
    pub fn observe_candle(&mut self, candle: Candle) -> Decimal {
        let mean = (candle.open + candle.close + candle.high + candle.low) / Decimal::from(4);

        self.last_candles.push_back(candle);
        self.last_candle_means.push_back(mean);
        while self.last_candles.len() > self.candles_capacity {
            self.last_candles.pop_front();
            self.last_candle_means.pop_front();
        }

        mean
    }

    /// Arithmetic mean of the candle-mean window, or `None` before the first
    /// candle has been observed. Callers must treat `None` as "not warmed up
    /// yet" and skip any comparison against it.
    pub fn rolling_candle_mean(&self) -> Option<Decimal> {
        if self.last_candle_means.is_empty() {
            return None;
        }
        let sum: Decimal = self.last_candle_means.iter().sum();
        Some(sum / Decimal::from(self.last_candle_means.len()))
    }

    /// Observe one trade, evicting the oldest at capacity.
    pub fn observe_trade(&mut self, trade: Trade) {
        self.last_trades.push_back(trade);
        while self.last_trades.len() > self.trades_capacity {
            self.last_trades.pop_front();
        }
    }

    /// Mean traded quantity across the trade window. Zero when empty.
    pub fn mean_trade_volume(&self) -> f64 {
        if self.last_trades.is_empty() {
            return 0.0;
        }
        let total: u64 = self.last_trades.iter().map(|t| t.quantity).sum();
        total as f64 / self.last_trades.len() as f64
    }

    /// Mean aggregate traded quantity per wall-clock second.
    ///
    /// Trades are bucketed by truncating their timestamp to whole seconds,
    /// quantities are summed per bucket, and the result is the mean of those
    /// bucket sums. A second with three small trades counts once, summed —
    /// this is typical flow per second, not a per-trade average. Zero when
    /// the window is empty.
    pub fn mean_volume_per_second(&self) -> f64 {
        if self.last_trades.is_empty() {
            return 0.0;
        }

        let mut per_second: HashMap<i64, u64> = HashMap::new();
        for trade in &self.last_trades {
            *per_second.entry(trade.time.timestamp()).or_insert(0) += trade.quantity;
        }

        let total: u64 = per_second.values().sum();
        total as f64 / per_second.len() as f64
    }

    /// Number of candles currently in the window.
    pub fn candle_count(&self) -> usize {
        self.last_candles.len()
    }

    /// Number of trades currently in the window.
    pub fn trade_count(&self) -> usize {
        self.last_trades.len()
    }

    /// The most recent candle, if any.
    pub fn latest_candle(&self) -> Option<&Candle> {
        self.last_candles.back()
    }
}
