// ===============================
// src/posttrade.rs
// ===============================
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::domain::{PositionChange, UiEvent};
use crate::terminal::TerminalEvent;

/// Activity log of the session: one line per terminal event.
pub async fn run(mut rx: broadcast::Receiver<TerminalEvent>) {
    loop {
        let ev = match rx.recv().await {
            Ok(ev) => ev,
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "activity log lagging");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match ev {
            TerminalEvent::OrderPlaced(o) => info!(id=%o.id, symbol=%o.symbol, side=%o.side, qty=o.qty, px=o.price, "PLACED"),
            TerminalEvent::OrderModified(o) => info!(id=%o.id, qty=o.qty, px=o.price, "MODIFIED"),
            TerminalEvent::OrderCancelled(o) => warn!(id=%o.id, symbol=%o.symbol, "CANCELLED"),
            TerminalEvent::OrderFilled(o) => info!(id=%o.id, symbol=%o.symbol, qty=o.qty, px=o.price, "FILLED"),
            TerminalEvent::Position(PositionChange::Opened(h)) => info!(symbol=%h.symbol, qty=h.qty, avg=h.avg_cost, "POSITION OPENED"),
            TerminalEvent::Position(PositionChange::Updated(h)) => info!(symbol=%h.symbol, qty=h.qty, avg=h.avg_cost, "POSITION"),
            TerminalEvent::Position(PositionChange::Closed { symbol }) => info!(%symbol, "POSITION CLOSED"),
            TerminalEvent::Position(PositionChange::Unchanged { symbol }) => debug!(%symbol, "position unchanged"),
            TerminalEvent::Rejected { action, reason } => warn!(%action, %reason, "REJECT"),
            TerminalEvent::Ui(UiEvent::SymbolSelected { symbol, price }) => info!(%symbol, price, "symbol selected"),
            TerminalEvent::Ui(UiEvent::Navigate(view)) => info!(?view, "navigate"),
            TerminalEvent::Ui(UiEvent::OpenCommandPalette) => info!("command palette"),
        }
    }
}
