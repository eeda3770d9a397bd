// =============================================================================
// OHLCV Bar — immutable market data unit, plus the in-process store adapter
// =============================================================================
//
// §6.1 describes the OHLCV store as an external, consumed interface:
// `readBars(symbol, timeframe, limit) -> []Bar`. The core never writes bars;
// it only reads closed ones. This module provides the `Bar` type and a
// `BarStore` trait so the rest of the pipeline is agnostic to what backs it,
// plus an in-memory ring-buffer implementation so the core is runnable and
// testable standalone.
// =============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::VecDeque;

/// One closed OHLCV bar. Timestamps are UTC millisecond epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Bar {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64, close_time: i64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
        }
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Retention floor mandated by §3.1 ("Retention >= 500 bars per (symbol, timeframe)").
pub const MIN_RETENTION: usize = 500;

fn key(symbol: &str, timeframe: &str) -> String {
    format!("{symbol}:{timeframe}")
}

/// Read-side contract for §6.1.
pub trait BarStore: Send + Sync {
    /// Most recent `limit` closed bars in ascending open_time order.
    fn read_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Vec<Bar>;
}

/// In-memory ring-buffer implementation of the OHLCV store.
pub struct InMemoryBarStore {
    bars: RwLock<HashMap<String, VecDeque<Bar>>>,
    capacity: usize,
}

impl InMemoryBarStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: RwLock::new(HashMap::new()),
            capacity: capacity.max(MIN_RETENTION),
        }
    }

    /// Append a closed bar for `(symbol, timeframe)`, evicting the oldest
    /// entry once `capacity` is exceeded.
    pub fn push(&self, symbol: &str, timeframe: &str, bar: Bar) {
        let mut bars = self.bars.write();
        let buf = bars.entry(key(symbol, timeframe)).or_default();
        buf.push_back(bar);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    pub fn len(&self, symbol: &str, timeframe: &str) -> usize {
        self.bars
            .read()
            .get(&key(symbol, timeframe))
            .map(|b| b.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBarStore {
    fn default() -> Self {
        Self::new(MIN_RETENTION)
    }
}

impl BarStore for InMemoryBarStore {
    fn read_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Vec<Bar> {
        let bars = self.bars.read();
        match bars.get(&key(symbol, timeframe)) {
            Some(buf) => buf.iter().rev().take(limit).rev().copied().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(t: i64, close: f64) -> Bar {
        Bar::new(t, close, close, close, close, 10.0, t + 59_999)
    }

    #[test]
    fn read_bars_returns_ascending_order() {
        let store = InMemoryBarStore::new(10);
        for i in 0..5 {
            store.push("BTCUSDT", "1h", bar(i * 1000, i as f64));
        }
        let bars = store.read_bars("BTCUSDT", "1h", 10);
        assert_eq!(bars.len(), 5);
        assert!(bars.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[test]
    fn push_evicts_oldest_beyond_capacity() {
        let store = InMemoryBarStore::new(3);
        for i in 0..5 {
            store.push("BTCUSDT", "1h", bar(i * 1000, i as f64));
        }
        assert_eq!(store.len("BTCUSDT", "1h"), 3);
        let bars = store.read_bars("BTCUSDT", "1h", 10);
        assert_eq!(bars[0].open_time, 2000);
    }

    #[test]
    fn unknown_symbol_returns_empty() {
        let store = InMemoryBarStore::default();
        assert!(store.read_bars("DOESNOTEXIST", "1h", 10).is_empty());
    }
}
