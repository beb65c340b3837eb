// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info, warn};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("feed_ticks_total", "price ticks applied to the feed").unwrap());

pub static TICKERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("feed_tickers", "symbols tracked by the feed").unwrap());

// -------- Orders --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "order lifecycle transitions (label: status)"),
        &["status"],
    )
    .unwrap()
});

pub static REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rejects_total", "rejected commands (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

// -------- Portfolio --------
pub static HOLDINGS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("portfolio_holdings", "open holdings").unwrap());

pub static PNL_UNREALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("portfolio_unrealized_pnl", "unrealized P&L").unwrap());

pub static MARKET_VALUE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("portfolio_market_value", "market value of holdings").unwrap());

// -------- Watchlists / config --------
pub static WATCHLISTS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("watchlists", "stored watchlists").unwrap());

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbols (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    let results = [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKERS.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(REJECTS.clone())),
        REGISTRY.register(Box::new(HOLDINGS.clone())),
        REGISTRY.register(Box::new(PNL_UNREALIZED.clone())),
        REGISTRY.register(Box::new(MARKET_VALUE.clone())),
        REGISTRY.register(Box::new(WATCHLISTS.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ];
    for r in results {
        if let Err(e) = r {
            // AlreadyReg on a second init() is harmless
            warn!(error = %e, "metrics: register failed");
        }
    }
}

pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// tiny HTTP/1.1 responder: every request gets the metrics page
fn handle_client(mut stream: TcpStream) {
    let mut req_buf = [0u8; 1024];
    let _ = stream.read(&mut req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Serves metrics from a dedicated OS thread, off the terminal runtime.
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "metrics: bind failed");
                return;
            }
        };
        info!("metrics listening on http://{addr}/metrics");
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => warn!(error = %e, "metrics: accept failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        init();
        init();
        ORDERS.with_label_values(&["OPEN"]).inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("orders_total"));
    }
}
