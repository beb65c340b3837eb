// ===============================
// src/portfolio.rs (holdings & P&L from fills)
// ===============================

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GuardPolicy;
use crate::domain::{
    Holding, HoldingView, Order, OrderStatus, PortfolioStats, PositionChange, Side, Ticker,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
    #[error("sell {requested} {symbol} exceeds held quantity {held}")]
    OverSell { symbol: String, held: i64, requested: i64 },
    #[error("no holding for {0}")]
    HoldingNotFound(String),
    #[error("buy {requested} {symbol} overflows held quantity {held}")]
    QuantityOverflow { symbol: String, held: i64, requested: i64 },
}

/// Outcome of reconciling one filled order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub order_id: String,
    pub result: Result<PositionChange, PortfolioError>,
}

/// Rollover of near-expiry derivative positions is delegated to this hook.
pub trait RolloverHook: Send {
    fn roll_over(&mut self, holding: &Holding);
}

/// Default hook: nothing to roll.
#[derive(Debug, Default)]
pub struct NoopRollover;

impl RolloverHook for NoopRollover {
    fn roll_over(&mut self, holding: &Holding) {
        info!(symbol = %holding.symbol, qty = holding.qty, "rollover requested, no derivatives module attached");
    }
}

#[derive(Debug, Default)]
pub struct Portfolio {
    holdings: Vec<Holding>,
    processed: HashSet<String>,
    policy: GuardPolicy,
}

impl Portfolio {
    pub fn new(policy: GuardPolicy) -> Self {
        Self { holdings: Vec::new(), processed: HashSet::new(), policy }
    }

    pub fn holdings(&self) -> &[Holding] { &self.holdings }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }

    #[cfg(test)]
    pub fn is_processed(&self, order_id: &str) -> bool { self.processed.contains(order_id) }

    /// Applies every FILLED order not seen before. Safe to call with the
    /// whole ledger on every update.
    pub fn reconcile<'a, I>(&mut self, orders: I) -> Vec<Reconciled>
    where
        I: IntoIterator<Item = &'a Order>,
    {
        let mut fresh: Vec<&Order> = orders
            .into_iter()
            .filter(|o| o.status == OrderStatus::Filled && !self.processed.contains(&o.id))
            .collect();
        // ledger is newest-first; apply in placement order
        fresh.sort_by_key(|o| o.timestamp);

        fresh
            .into_iter()
            .map(|o| Reconciled { order_id: o.id.clone(), result: self.apply_fill(o) })
            .collect()
    }

    /// Applies one fill. The order id is recorded even when the fill is
    /// rejected, so it is never retried.
    pub fn apply_fill(&mut self, order: &Order) -> Result<PositionChange, PortfolioError> {
        if !self.processed.insert(order.id.clone()) {
            debug!(id = %order.id, "fill already reconciled");
            return Ok(match self.holding(&order.symbol) {
                Some(h) => PositionChange::Updated(h.clone()),
                None => PositionChange::Unchanged { symbol: order.symbol.clone() },
            });
        }

        let idx = self.holdings.iter().position(|h| h.symbol == order.symbol);
        let change = match (order.side, idx) {
            (Side::Buy, None) => {
                let h = Holding { symbol: order.symbol.clone(), qty: order.qty, avg_cost: order.price };
                self.holdings.push(h.clone());
                PositionChange::Opened(h)
            }
            (Side::Buy, Some(i)) => {
                let h = &mut self.holdings[i];
                let Some(new_qty) = h.qty.checked_add(order.qty) else {
                    warn!(id = %order.id, symbol = %order.symbol, held = h.qty, qty = order.qty, "buy overflows holding, rejected");
                    return Err(PortfolioError::QuantityOverflow {
                        symbol: order.symbol.clone(),
                        held: h.qty,
                        requested: order.qty,
                    });
                };
                h.avg_cost = (h.avg_cost * h.qty as f64 + order.price * order.qty as f64) / new_qty as f64;
                h.qty = new_qty;
                PositionChange::Updated(h.clone())
            }
            (Side::Sell, None) => {
                if self.policy == GuardPolicy::Strict {
                    warn!(id = %order.id, symbol = %order.symbol, "sell without holding rejected");
                    return Err(PortfolioError::OverSell {
                        symbol: order.symbol.clone(),
                        held: 0,
                        requested: order.qty,
                    });
                }
                // nothing held, nothing to close
                PositionChange::Unchanged { symbol: order.symbol.clone() }
            }
            (Side::Sell, Some(i)) => {
                let held = self.holdings[i].qty;
                let new_qty = held - order.qty;
                if new_qty < 0 && self.policy == GuardPolicy::Strict {
                    warn!(id = %order.id, symbol = %order.symbol, held, qty = order.qty, "over-sell rejected");
                    return Err(PortfolioError::OverSell {
                        symbol: order.symbol.clone(),
                        held,
                        requested: order.qty,
                    });
                }
                if new_qty <= 0 {
                    self.holdings.remove(i);
                    PositionChange::Closed { symbol: order.symbol.clone() }
                } else {
                    // cost basis unchanged on sells
                    self.holdings[i].qty = new_qty;
                    PositionChange::Updated(self.holdings[i].clone())
                }
            }
        };
        debug!(id = %order.id, symbol = %order.symbol, change = ?change, "fill reconciled");
        Ok(change)
    }

    /// Marks every holding against `tickers`, falling back to avg cost.
    pub fn project(&self, tickers: &[Ticker]) -> Vec<HoldingView> {
        let ltp: HashMap<&str, f64> = tickers.iter().map(|t| (t.symbol.as_str(), t.ltp)).collect();
        self.holdings
            .iter()
            .map(|h| {
                let current_price = ltp.get(h.symbol.as_str()).copied().unwrap_or(h.avg_cost);
                let unrealized_pl = (current_price - h.avg_cost) * h.qty as f64;
                let pl_percentage = if h.avg_cost != 0.0 {
                    (current_price - h.avg_cost) / h.avg_cost * 100.0
                } else {
                    0.0
                };
                HoldingView {
                    symbol: h.symbol.clone(),
                    qty: h.qty,
                    avg_cost: h.avg_cost,
                    current_price,
                    unrealized_pl,
                    pl_percentage,
                    market_value: current_price * h.qty as f64,
                }
            })
            .collect()
    }

    /// Closes a position to zero quantity without touching the ledger.
    pub fn square_off(&mut self, symbol: &str) -> Result<Holding, PortfolioError> {
        let h = self
            .holdings
            .iter_mut()
            .find(|h| h.symbol == symbol)
            .ok_or_else(|| PortfolioError::HoldingNotFound(symbol.to_string()))?;
        h.qty = 0;
        info!(%symbol, "position squared off");
        Ok(h.clone())
    }

    pub fn roll_over(&self, symbol: &str, hook: &mut dyn RolloverHook) -> Result<(), PortfolioError> {
        let h = self.holding(symbol).ok_or_else(|| PortfolioError::HoldingNotFound(symbol.to_string()))?;
        hook.roll_over(h);
        Ok(())
    }
}

pub fn stats(views: &[HoldingView]) -> PortfolioStats {
    let total_market_value: f64 = views.iter().map(|v| v.market_value).sum();
    let total_invested: f64 = views.iter().map(|v| v.avg_cost * v.qty as f64).sum();
    let total_pl = total_market_value - total_invested;
    let pl_percentage = if total_invested != 0.0 { total_pl / total_invested * 100.0 } else { 0.0 };
    PortfolioStats { total_market_value, total_invested, total_pl, pl_percentage }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    struct Fills { seq: i64 }

    impl Fills {
        fn new() -> Self { Self { seq: 0 } }

        fn fill(&mut self, symbol: &str, side: Side, qty: i64, price: f64) -> Order {
            self.seq += 1;
            Order {
                id: format!("F-{}", self.seq),
                symbol: symbol.into(),
                qty,
                price,
                side,
                status: OrderStatus::Filled,
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::seconds(self.seq),
                time: String::new(),
            }
        }
    }

    fn ticker(symbol: &str, ltp: f64) -> Ticker {
        Ticker { symbol: symbol.into(), ltp, change: 0.0, volume: "-".into() }
    }

    #[test]
    fn reliance_round_trip_scenario() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();

        let b1 = f.fill("RELIANCE", Side::Buy, 10, 2400.0);
        p.reconcile([&b1]);
        assert_eq!(p.holding("RELIANCE"), Some(&Holding { symbol: "RELIANCE".into(), qty: 10, avg_cost: 2400.0 }));

        let b2 = f.fill("RELIANCE", Side::Buy, 10, 2600.0);
        p.reconcile([&b2, &b1]);
        let h = p.holding("RELIANCE").unwrap();
        assert_eq!(h.qty, 20);
        assert!((h.avg_cost - 2500.0).abs() < 1e-9);

        let s = f.fill("RELIANCE", Side::Sell, 20, 2700.0);
        let out = p.reconcile([&s, &b2, &b1]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result, Ok(PositionChange::Closed { symbol: "RELIANCE".into() }));
        assert!(p.holdings().is_empty());
    }

    #[test]
    fn avg_cost_is_quantity_weighted_mean_of_buys() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        let buys = [(3, 101.5), (17, 99.25), (1, 250.0), (40, 98.0), (9, 100.01)];
        let orders: Vec<Order> = buys.iter().map(|&(q, px)| f.fill("TCS", Side::Buy, q, px)).collect();
        p.reconcile(orders.iter());

        let qty: i64 = buys.iter().map(|b| b.0).sum();
        let want = buys.iter().map(|&(q, px)| q as f64 * px).sum::<f64>() / qty as f64;
        let h = p.holding("TCS").unwrap();
        assert_eq!(h.qty, qty);
        assert!((h.avg_cost - want).abs() < 1e-9);
    }

    #[test]
    fn reconciling_twice_is_a_no_op() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        let orders = vec![f.fill("INFY", Side::Buy, 5, 1500.0), f.fill("INFY", Side::Sell, 2, 1550.0)];

        assert_eq!(p.reconcile(orders.iter()).len(), 2);
        let once = p.holdings().to_vec();
        assert!(p.reconcile(orders.iter()).is_empty());
        assert!(p.apply_fill(&orders[0]).is_ok());
        assert_eq!(p.holdings(), &once[..]);
        assert_eq!(once[0].qty, 3);
        assert_eq!(once[0].avg_cost, 1500.0);
    }

    #[test]
    fn open_and_cancelled_orders_are_ignored() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        let mut open = f.fill("ITC", Side::Buy, 5, 400.0);
        open.status = OrderStatus::Open;
        let mut cancelled = f.fill("ITC", Side::Buy, 5, 400.0);
        cancelled.status = OrderStatus::Cancelled;
        assert!(p.reconcile([&open, &cancelled]).is_empty());
        assert!(!p.is_processed(&open.id));
    }

    #[test]
    fn over_sell_rejected_when_strict() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        p.reconcile([&f.fill("SBIN", Side::Buy, 5, 600.0)]);
        let sell = f.fill("SBIN", Side::Sell, 8, 610.0);
        let out = p.reconcile([&sell]);
        assert_eq!(
            out[0].result,
            Err(PortfolioError::OverSell { symbol: "SBIN".into(), held: 5, requested: 8 })
        );
        assert_eq!(p.holding("SBIN").unwrap().qty, 5);
        assert!(p.is_processed(&sell.id));

        let naked = f.fill("LT", Side::Sell, 1, 3000.0);
        assert!(matches!(p.apply_fill(&naked), Err(PortfolioError::OverSell { held: 0, .. })));
    }

    #[test]
    fn over_sell_closes_position_when_permissive() {
        let mut p = Portfolio::new(GuardPolicy::Permissive);
        let mut f = Fills::new();
        p.reconcile([&f.fill("SBIN", Side::Buy, 5, 600.0)]);
        let out = p.reconcile([&f.fill("SBIN", Side::Sell, 8, 610.0)]);
        assert_eq!(out[0].result, Ok(PositionChange::Closed { symbol: "SBIN".into() }));
        assert!(p.holding("SBIN").is_none());
    }

    #[test]
    fn sell_without_holding_is_a_no_op_when_permissive() {
        let mut p = Portfolio::new(GuardPolicy::Permissive);
        let mut f = Fills::new();
        let out = p.reconcile([&f.fill("LT", Side::Sell, 3, 3000.0)]);
        assert_eq!(out[0].result, Ok(PositionChange::Unchanged { symbol: "LT".into() }));
        assert!(p.holdings().is_empty());
    }

    #[test]
    fn huge_buys_are_rejected_instead_of_overflowing() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        let first = f.fill("TCS", Side::Buy, i64::MAX, 1.0);
        let second = f.fill("TCS", Side::Buy, i64::MAX, 1.0);
        let out = p.reconcile([&second, &first]);

        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].result, Ok(PositionChange::Opened(_))));
        assert_eq!(
            out[1].result,
            Err(PortfolioError::QuantityOverflow { symbol: "TCS".into(), held: i64::MAX, requested: i64::MAX })
        );
        assert_eq!(p.holding("TCS").unwrap().qty, i64::MAX);
        assert!(p.is_processed(&second.id));
    }

    #[test]
    fn partial_sell_keeps_cost_basis() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        p.reconcile([&f.fill("TCS", Side::Buy, 10, 3500.0)]);
        p.reconcile([&f.fill("TCS", Side::Sell, 4, 3900.0)]);
        assert_eq!(p.holding("TCS"), Some(&Holding { symbol: "TCS".into(), qty: 6, avg_cost: 3500.0 }));
    }

    #[test]
    fn projection_and_totals() {
        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        p.reconcile([
            &f.fill("TCS", Side::Buy, 10, 3500.0),
            &f.fill("INFY", Side::Buy, 4, 1500.0),
            &f.fill("NOFEED", Side::Buy, 2, 50.0),
        ]);
        let tickers = [ticker("TCS", 3600.0), ticker("INFY", 1450.0)];
        let views = p.project(&tickers);

        let tcs = views.iter().find(|v| v.symbol == "TCS").unwrap();
        assert_eq!(tcs.unrealized_pl, 1000.0);
        assert!((tcs.pl_percentage - 100.0 / 35.0).abs() < 1e-9);
        assert_eq!(tcs.market_value, 36_000.0);

        let nofeed = views.iter().find(|v| v.symbol == "NOFEED").unwrap();
        assert_eq!((nofeed.current_price, nofeed.unrealized_pl), (50.0, 0.0));

        let st = stats(&views);
        let want: f64 = p
            .holdings()
            .iter()
            .map(|h| (tickers.iter().find(|t| t.symbol == h.symbol).map_or(h.avg_cost, |t| t.ltp) - h.avg_cost) * h.qty as f64)
            .sum();
        assert!((st.total_pl - want).abs() < 1e-9);
        assert_eq!(st.total_invested, 35_000.0 + 6_000.0 + 100.0);
        assert!((st.pl_percentage - want / st.total_invested * 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_portfolio_percentage_is_zero() {
        assert_eq!(stats(&[]), PortfolioStats::default());
    }

    #[test]
    fn square_off_and_rollover() {
        struct Spy(Vec<String>);
        impl RolloverHook for Spy {
            fn roll_over(&mut self, h: &Holding) { self.0.push(h.symbol.clone()); }
        }

        let mut p = Portfolio::new(GuardPolicy::Strict);
        let mut f = Fills::new();
        p.reconcile([&f.fill("NIFTY", Side::Buy, 50, 21000.0)]);

        let mut spy = Spy(Vec::new());
        p.roll_over("NIFTY", &mut spy).unwrap();
        assert_eq!(spy.0, vec!["NIFTY"]);
        assert_eq!(p.roll_over("TCS", &mut spy), Err(PortfolioError::HoldingNotFound("TCS".into())));

        let h = p.square_off("NIFTY").unwrap();
        assert_eq!(h.qty, 0);
        assert_eq!(p.holding("NIFTY").unwrap().avg_cost, 21000.0);
        assert!(p.square_off("TCS").is_err());
        assert_eq!(stats(&p.project(&[])).total_market_value, 0.0);
    }
}
