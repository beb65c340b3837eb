// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Side::Buy => f.write_str("BUY"), Side::Sell => f.write_str("SELL") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus { Open, Filled, Cancelled }

impl OrderStatus {
    /// FILLED and CANCELLED accept no further transitions.
    pub fn is_terminal(&self) -> bool { !matches!(self, OrderStatus::Open) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker { pub symbol: String, pub ltp: f64, pub change: f64, pub volume: String }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub qty: i64,
    pub price: f64,
    pub side: Side,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    /// Local wall-clock label, e.g. "14:03:27".
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding { pub symbol: String, pub qty: i64, pub avg_cost: f64 }

/// Holding marked against the live feed. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
    pub symbol: String,
    pub qty: i64,
    pub avg_cost: f64,
    pub current_price: f64,
    #[serde(rename = "unrealizedPL")]
    pub unrealized_pl: f64,
    pub pl_percentage: f64,
    pub market_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub total_market_value: f64,
    pub total_invested: f64,
    #[serde(rename = "totalPL")]
    pub total_pl: f64,
    pub pl_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionChange {
    Opened(Holding),
    Updated(Holding),
    Closed { symbol: String },
    /// Fill applied with no effect on holdings.
    Unchanged { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistSettings { pub columns: Vec<String> }

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self { columns: vec!["ltp".into(), "change".into(), "volume".into()] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    pub name: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub settings: WatchlistSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View { MarketWatch, Orders, Portfolio, Options, Charts }

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market-watch" | "marketwatch" | "watch" => Ok(View::MarketWatch),
            "orders" => Ok(View::Orders),
            "portfolio" | "positions" => Ok(View::Portfolio),
            "options" => Ok(View::Options),
            "charts" | "chart" => Ok(View::Charts),
            other => Err(format!("unknown view '{other}'")),
        }
    }
}

/// Cross-view notifications between the shell and sibling views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UiEvent {
    SymbolSelected { symbol: String, price: f64 },
    Navigate(View),
    OpenCommandPalette,
}

/// Journal record written by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Order(Order), Fill(Order), Position(PositionChange), Note(String) }

/// Trim + upper-case a user supplied symbol.
pub fn normalize_symbol(raw: &str) -> String { raw.trim().to_ascii_uppercase() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_ui_schema() {
        let h = Holding { symbol: "TCS".into(), qty: 3, avg_cost: 10.0 };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["avgCost"], 10.0);

        let s = serde_json::to_value(OrderStatus::Cancelled).unwrap();
        assert_eq!(s, "CANCELLED");
        assert_eq!(serde_json::to_value(Side::Buy).unwrap(), "BUY");
    }

    #[test]
    fn watchlist_without_settings_uses_default_columns() {
        let w: Watchlist =
            serde_json::from_str(r#"{"id":"1","name":"x","symbols":["TCS"]}"#).unwrap();
        assert_eq!(w.settings, WatchlistSettings::default());
    }

    #[test]
    fn view_parses_aliases() {
        assert_eq!("Portfolio".parse::<View>(), Ok(View::Portfolio));
        assert_eq!("marketwatch".parse::<View>(), Ok(View::MarketWatch));
        assert!("nowhere".parse::<View>().is_err());
    }
}
