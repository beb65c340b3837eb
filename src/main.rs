// ===============================
// src/main.rs
// ===============================
/*
 # run with a persisted watchlist and an event journal
 WATCHLIST_FILE=data/watchlists.json RECORD_FILE=data/events.jsonl cargo run

 # current P&L / order counters
 curl -s localhost:9898/metrics | egrep '^(portfolio_|orders_total)'
*/
/*
=============================================================================
Project : ledgerone — brokerage console core (mock feed, orders, portfolio)
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Simulates a brokerage terminal session: random-walk quotes,
          an order ledger with delayed mock fills, a portfolio reconciled
          from fills (weighted-average cost, unrealized P&L), persisted
          watchlists, Prometheus metrics and a JSONL event journal.
=============================================================================
*/
mod config;
mod console;
mod domain;
mod feed;
mod ledger;
mod metrics;
mod portfolio;
mod posttrade;
mod recorder;
mod terminal;
mod watchlist;

use tokio::{io::BufReader, sync::mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::domain::Event;
use crate::terminal::Terminal;
use crate::watchlist::{JsonFileStore, MemoryStore, WatchlistStore};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config ----
    let args = config::load();
    info!(
        symbols = ?args.symbols,
        tick_ms = args.tick_interval.as_millis() as u64,
        fill_delay_ms = args.fill_delay.as_millis() as u64,
        guards = ?args.guard_policy,
        watchlist_file = ?args.watchlist_file,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    for s in &args.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s]).set(1);
    }
    if args.metrics_port != 0 {
        metrics::serve_metrics(args.metrics_port);
    }

    // ---- Watchlist storage ----
    let store: Box<dyn WatchlistStore> = match &args.watchlist_file {
        Some(path) => Box::new(JsonFileStore::new(path)),
        None => Box::new(MemoryStore::default()),
    };

    // ---- Terminal (+ optional recorder) ----
    let (rec_tx, recorder_task) = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            (Some(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (None, None),
    };
    let mut terminal = Terminal::new(&args, store);
    if let Some(tx) = rec_tx {
        terminal = terminal.with_recorder(tx);
    }
    let (handle, terminal_task) = terminal.spawn();

    // ---- Activity log ----
    tokio::spawn(posttrade::run(handle.subscribe()));

    // ---- Console until quit / EOF ----
    console::run(handle.clone(), BufReader::new(tokio::io::stdin())).await;

    handle.shutdown().await;
    let _ = terminal_task.await;
    drop(handle);
    if let Some(task) = recorder_task {
        let _ = task.await;
    }
    info!("bye");
}
