// ===============================
// src/ledger.rs (order book of the session + mock execution)
// ===============================
//
// Orders are kept newest-first. Lifecycle:
//
//   OPEN --cancel--> CANCELLED
//   OPEN --fill----> FILLED
//
// Execution is simulated: at most one OPEN order is "in flight" at a time.
// arm_fill() picks the oldest OPEN order and gives it a deadline of
// now + fill_delay; fire_fill() flips it to FILLED once the deadline passed.
// The owner (terminal) sleeps until next_fill_due().
//

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::GuardPolicy;
use crate::domain::{normalize_symbol, Order, OrderStatus, Side};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("order {0} not found")]
    OrderNotFound(String),
    #[error("order {id} is {status}, cannot {action}")]
    InvalidTransition { id: String, status: OrderStatus, action: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingFill { pub order_id: String, pub due: Instant }

#[derive(Debug)]
pub struct OrderLedger {
    orders: Vec<Order>,
    fill_delay: Duration,
    policy: GuardPolicy,
    pending: Option<PendingFill>,
}

/// Largest quantity accepted on a single order.
pub const MAX_ORDER_QTY: i64 = 1_000_000_000;

fn validate(qty: i64, price: f64) -> Result<(), LedgerError> {
    if qty <= 0 {
        return Err(LedgerError::InvalidOrder(format!("qty must be positive, got {qty}")));
    }
    if qty > MAX_ORDER_QTY {
        return Err(LedgerError::InvalidOrder(format!("qty {qty} exceeds limit {MAX_ORDER_QTY}")));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(LedgerError::InvalidOrder(format!("price must be positive, got {price}")));
    }
    Ok(())
}

impl OrderLedger {
    pub fn new(fill_delay: Duration, policy: GuardPolicy) -> Self {
        Self { orders: Vec::new(), fill_delay, policy, pending: None }
    }

    /// All orders, newest first.
    pub fn orders(&self) -> &[Order] { &self.orders }

    pub fn get(&self, id: &str) -> Option<&Order> { self.orders.iter().find(|o| o.id == id) }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status == OrderStatus::Open)
    }

    pub fn pending_fill(&self) -> Option<&PendingFill> { self.pending.as_ref() }

    pub fn next_fill_due(&self) -> Option<Instant> { self.pending_fill().map(|p| p.due) }

    pub fn place(
        &mut self,
        symbol: &str,
        qty: i64,
        price: f64,
        side: Side,
        now: DateTime<Utc>,
    ) -> Result<Order, LedgerError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(LedgerError::InvalidOrder("symbol is empty".into()));
        }
        validate(qty, price)?;

        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate = format!("ORD-{}-{:04}", now.timestamp_millis(), rng.gen_range(0..10_000));
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };

        let order = Order {
            id,
            symbol,
            qty,
            price,
            side,
            status: OrderStatus::Open,
            timestamp: now,
            time: now.with_timezone(&Local).format("%H:%M:%S").to_string(),
        };
        debug!(id = %order.id, symbol = %order.symbol, side = %side, qty, price, "order placed");
        self.orders.insert(0, order.clone());
        Ok(order)
    }

    pub fn cancel(&mut self, id: &str) -> Result<Order, LedgerError> {
        let policy = self.policy;
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| LedgerError::OrderNotFound(id.to_string()))?;

        if order.status.is_terminal() {
            match policy {
                GuardPolicy::Strict => {
                    return Err(LedgerError::InvalidTransition {
                        id: id.to_string(),
                        status: order.status,
                        action: "cancel",
                    })
                }
                GuardPolicy::Permissive => {
                    warn!(id, status = %order.status, "cancelling non-open order (permissive)")
                }
            }
        }

        order.status = OrderStatus::Cancelled;
        let out = order.clone();
        if self.pending.as_ref().is_some_and(|p| p.order_id == id) {
            self.pending = None;
        }
        debug!(id, symbol = %out.symbol, "order cancelled");
        Ok(out)
    }

    pub fn modify(&mut self, id: &str, qty: i64, price: f64) -> Result<Order, LedgerError> {
        let policy = self.policy;
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| LedgerError::OrderNotFound(id.to_string()))?;

        if order.status.is_terminal() {
            match policy {
                GuardPolicy::Strict => {
                    return Err(LedgerError::InvalidTransition {
                        id: id.to_string(),
                        status: order.status,
                        action: "modify",
                    })
                }
                GuardPolicy::Permissive => {
                    warn!(id, status = %order.status, "modifying non-open order (permissive)")
                }
            }
        }
        validate(qty, price)?;

        order.qty = qty;
        order.price = price;
        debug!(id, qty, price, "order modified");
        Ok(order.clone())
    }

    /// Schedules the oldest OPEN order if nothing is in flight.
    /// Returns the deadline of the in-flight order, if any.
    pub fn arm_fill(&mut self, now: Instant) -> Option<Instant> {
        if self.pending.is_none() {
            // newest-first, so the oldest open order is the last one
            if let Some(o) = self.orders.iter().rev().find(|o| o.status == OrderStatus::Open) {
                self.pending = Some(PendingFill { order_id: o.id.clone(), due: now + self.fill_delay });
            }
        }
        self.next_fill_due()
    }

    /// Fills the in-flight order if its deadline has passed.
    pub fn fire_fill(&mut self, now: Instant) -> Option<Order> {
        match &self.pending {
            Some(p) if p.due <= now => {}
            _ => return None,
        }
        let pending = self.pending.take()?;
        let order = self.orders.iter_mut().find(|o| o.id == pending.order_id)?;
        if order.status != OrderStatus::Open {
            return None;
        }
        order.status = OrderStatus::Filled;
        debug!(id = %order.id, symbol = %order.symbol, "mock fill");
        Some(order.clone())
    }

    pub fn filled_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status == OrderStatus::Filled)
    }
}
