// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : ledgerone — brokerage console core (mock feed, orders, portfolio)
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Simulates a brokerage terminal session: random-walk quotes,
          an order ledger with delayed mock fills, a portfolio reconciled
          from fills (weighted-average cost, unrealized P&L), persisted
          watchlists, Prometheus metrics and a JSONL event journal.
=============================================================================
*/
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

/// How strictly order/position state transitions are enforced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GuardPolicy {
    /// Reject cancel/modify of non-open orders and sells beyond the holding.
    #[default]
    Strict,
    /// Apply them anyway (logged), closing over-sold positions.
    Permissive,
}

impl GuardPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(GuardPolicy::Strict),
            "permissive" | "lenient" => Some(GuardPolicy::Permissive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // market
    pub symbols: Vec<String>,
    pub tick_interval: Duration,
    pub tick_max_delta: f64,
    pub feed_seed: Option<u64>,

    // orders / positions
    pub fill_delay: Duration,
    pub guard_policy: GuardPolicy,

    // files / metrics
    pub watchlist_file: Option<PathBuf>,
    pub record_file: Option<String>,
    pub metrics_port: u16, // 0 = disabled
}

const DEFAULT_SYMBOLS: &str = "RELIANCE,TCS,HDFCBANK,INFY,ICICIBANK,SBIN,ITC,LT,NIFTY,BANKNIFTY";

impl Default for Args {
    fn default() -> Self { from_lookup(|_| None) }
}

/// Builds `Args` from any key lookup (env, map in tests).
pub fn from_lookup<F>(get: F) -> Args
where
    F: Fn(&str) -> Option<String>,
{
    let num = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

    // SYMBOLS=RELIANCE,TCS,INFY
    let symbols: Vec<String> = get("SYMBOLS")
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_SYMBOLS.split(',').map(String::from).collect());

    let tick_interval = Duration::from_millis(num("TICK_INTERVAL_MS").filter(|&ms| ms > 0).unwrap_or(1500));
    let tick_max_delta = get("TICK_MAX_DELTA")
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .map(f64::abs)
        .unwrap_or(1.0);
    let feed_seed = num("FEED_SEED");

    let fill_delay = Duration::from_millis(num("FILL_DELAY_MS").unwrap_or(3000));
    let guard_policy = get("GUARD_POLICY")
        .and_then(|s| GuardPolicy::parse(&s))
        .unwrap_or_default();

    let watchlist_file = get("WATCHLIST_FILE").filter(|s| !s.trim().is_empty()).map(PathBuf::from);
    let record_file = get("RECORD_FILE").filter(|s| !s.trim().is_empty());
    let metrics_port = get("METRICS_PORT")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(9898);

    Args {
        symbols,
        tick_interval,
        tick_max_delta,
        feed_seed,
        fill_delay,
        guard_policy,
        watchlist_file,
        record_file,
        metrics_port,
    }
}

pub fn load() -> Args {
    // .env first so RECORD_FILE, WATCHLIST_FILE, ... are visible
    let _ = dotenv();
    from_lookup(|key| env::var(key).ok())
}
