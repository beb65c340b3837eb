// ===============================
// src/feed.rs
// ===============================
//
// Mock market data:
// - MarketFeed keeps one Ticker per symbol (insertion ordered).
// - tick() random-walks every ltp by U(-max_delta, max_delta).
// - `change` is always relative to the session reference close, which is
//   recovered from the previous ltp/change pair, so it never drifts.
//
// The rng is passed in so tests can seed it.
//

use ahash::AHashMap as HashMap;
use rand::Rng;
use tracing::debug;

use crate::domain::{normalize_symbol, Ticker};

const MIN_LTP: f64 = 0.05;

// reference prices for the default universe
const SEEDS: &[(&str, f64, &str)] = &[
    ("RELIANCE", 2450.50, "4.2M"),
    ("TCS", 3520.75, "1.8M"),
    ("HDFCBANK", 1645.20, "6.1M"),
    ("INFY", 1480.10, "3.3M"),
    ("ICICIBANK", 985.40, "7.9M"),
    ("SBIN", 612.35, "12.4M"),
    ("ITC", 438.90, "9.7M"),
    ("LT", 3010.00, "1.1M"),
    ("NIFTY", 21450.00, "-"),
    ("BANKNIFTY", 47820.00, "-"),
];

#[derive(Debug, Clone)]
pub struct MarketFeed {
    tickers: Vec<Ticker>,
    index: HashMap<String, usize>,
    max_delta: f64,
}

impl MarketFeed {
    pub fn new(max_delta: f64) -> Self {
        Self { tickers: Vec::new(), index: HashMap::new(), max_delta: max_delta.abs() }
    }

    /// Feed pre-populated with `symbols`.
    pub fn with_symbols<R: Rng>(max_delta: f64, symbols: &[String], rng: &mut R) -> Self {
        let mut feed = Self::new(max_delta);
        for s in symbols {
            feed.ensure_ticker(s, rng);
        }
        feed
    }

    pub fn tickers(&self) -> &[Ticker] { &self.tickers }

    pub fn get(&self, symbol: &str) -> Option<&Ticker> {
        self.index.get(symbol).map(|&i| &self.tickers[i])
    }

    /// Inserts a ticker for `symbol` if absent. Returns true when inserted.
    pub fn ensure_ticker<R: Rng>(&mut self, symbol: &str, rng: &mut R) -> bool {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() || self.index.contains_key(&symbol) {
            return false;
        }
        let (ltp, volume) = match SEEDS.iter().find(|(s, _, _)| *s == symbol) {
            Some((_, px, vol)) => (*px, (*vol).to_string()),
            None => (
                round2(rng.gen_range(100.0..3000.0)),
                volume_label(rng.gen_range(100_000..5_000_000)),
            ),
        };
        debug!(%symbol, ltp, "feed: new ticker");
        self.index.insert(symbol.clone(), self.tickers.len());
        self.tickers.push(Ticker { symbol, ltp, change: 0.0, volume });
        true
    }

    pub fn tick<R: Rng>(&mut self, rng: &mut R) {
        if self.max_delta == 0.0 {
            return;
        }
        for t in self.tickers.iter_mut() {
            let prev_close = reference_close(t);
            let step = rng.gen_range(-self.max_delta..=self.max_delta);
            t.ltp = round2((t.ltp + step).max(MIN_LTP));
            t.change = if prev_close > 0.0 { (t.ltp - prev_close) / prev_close * 100.0 } else { 0.0 };
        }
    }
}

/// Price implied by the ticker's current ltp and percent change.
pub fn reference_close(t: &Ticker) -> f64 {
    let base = 1.0 + t.change / 100.0;
    if base <= 0.0 { t.ltp } else { t.ltp / base }
}

fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

fn volume_label(v: u64) -> String {
    if v >= 1_000_000 {
        format!("{:.1}M", v as f64 / 1_000_000.0)
    } else {
        format!("{}K", v / 1_000)
    }
}
