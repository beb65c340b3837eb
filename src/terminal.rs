// ===============================
// src/terminal.rs (session shell: owns every store, one task)
// ===============================
//
// All state lives in a single task. Everything else talks to it through a
// TerminalHandle:
//   commands  -> mpsc<Command> (each with a oneshot reply)
//   snapshots <- watch (tickers, orders, portfolio, watchlists)
//   events    <- broadcast<TerminalEvent>
//
// Timers (price tick, pending fill) are select! branches of the same loop,
// so they die with it on shutdown.
//

use std::future::pending;

use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval, sleep_until, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::config::Args;
use crate::domain::{
    normalize_symbol, Event, Holding, HoldingView, Order, PortfolioStats, PositionChange, Side,
    Ticker, UiEvent, View, Watchlist,
};
use crate::feed::MarketFeed;
use crate::ledger::{LedgerError, OrderLedger};
use crate::metrics::{
    HOLDINGS, MARKET_VALUE, ORDERS, PNL_UNREALIZED, REJECTS, TICKERS, TICKS, WATCHLISTS,
};
use crate::portfolio::{self, NoopRollover, Portfolio, PortfolioError, RolloverHook};
use crate::watchlist::{WatchlistBook, WatchlistError, WatchlistStore};

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
    #[error(transparent)]
    Watchlist(#[from] WatchlistError),
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("terminal is not running")]
    Closed,
}

impl TerminalError {
    fn reason(&self) -> &'static str {
        match self {
            TerminalError::Ledger(LedgerError::InvalidOrder(_)) => "invalid_order",
            TerminalError::Ledger(LedgerError::OrderNotFound(_)) => "order_not_found",
            TerminalError::Ledger(LedgerError::InvalidTransition { .. }) => "invalid_transition",
            TerminalError::Portfolio(PortfolioError::OverSell { .. }) => "over_sell",
            TerminalError::Portfolio(PortfolioError::HoldingNotFound(_)) => "holding_not_found",
            TerminalError::Portfolio(PortfolioError::QuantityOverflow { .. }) => "qty_overflow",
            TerminalError::Watchlist(_) => "watchlist",
            TerminalError::UnknownSymbol(_) => "unknown_symbol",
            TerminalError::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TerminalEvent {
    Ui(UiEvent),
    OrderPlaced(Order),
    OrderModified(Order),
    OrderCancelled(Order),
    OrderFilled(Order),
    Position(PositionChange),
    Rejected { action: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub holdings: Vec<HoldingView>,
    pub stats: PortfolioStats,
}

pub type Reply<T> = oneshot::Sender<Result<T, TerminalError>>;

pub enum Command {
    PlaceOrder { symbol: String, qty: i64, price: f64, side: Side, reply: Reply<Order> },
    CancelOrder { id: String, reply: Reply<Order> },
    ModifyOrder { id: String, qty: i64, price: f64, reply: Reply<Order> },
    SquareOff { symbol: String, reply: Reply<Holding> },
    RollOver { symbol: String, reply: Reply<()> },
    SelectSymbol { symbol: String, reply: Reply<Ticker> },
    Navigate(View),
    OpenCommandPalette,
    CreateWatchlist { name: String, reply: Reply<Watchlist> },
    DeleteWatchlist { id: String, reply: Reply<()> },
    RenameWatchlist { id: String, name: String, reply: Reply<Watchlist> },
    AddToWatchlist { id: String, symbol: String, reply: Reply<bool> },
    RemoveFromWatchlist { id: String, symbol: String, reply: Reply<bool> },
    SetWatchlistColumns { id: String, columns: Vec<String>, reply: Reply<()> },
    Shutdown,
}

pub struct Terminal {
    feed: MarketFeed,
    ledger: OrderLedger,
    portfolio: Portfolio,
    watchlists: WatchlistBook,
    rollover: Box<dyn RolloverHook>,
    recorder: Option<mpsc::Sender<Event>>,
    rng: StdRng,
    tick_every: Duration,

    tickers_tx: watch::Sender<Vec<Ticker>>,
    orders_tx: watch::Sender<Vec<Order>>,
    portfolio_tx: watch::Sender<PortfolioSnapshot>,
    watchlists_tx: watch::Sender<Vec<Watchlist>>,
    events_tx: broadcast::Sender<TerminalEvent>,
}

impl Terminal {
    pub fn new(args: &Args, store: Box<dyn WatchlistStore>) -> Self {
        let mut rng = match args.feed_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let watchlists = WatchlistBook::load(store);
        let mut feed = MarketFeed::with_symbols(args.tick_max_delta, &args.symbols, &mut rng);
        for w in watchlists.lists() {
            for s in &w.symbols {
                feed.ensure_ticker(s, &mut rng);
            }
        }

        let (tickers_tx, _) = watch::channel(feed.tickers().to_vec());
        let (orders_tx, _) = watch::channel(Vec::new());
        let (portfolio_tx, _) = watch::channel(PortfolioSnapshot::default());
        let (watchlists_tx, _) = watch::channel(watchlists.lists().to_vec());
        let (events_tx, _) = broadcast::channel(1024);

        Self {
            feed,
            ledger: OrderLedger::new(args.fill_delay, args.guard_policy),
            portfolio: Portfolio::new(args.guard_policy),
            watchlists,
            rollover: Box::new(NoopRollover),
            recorder: None,
            rng,
            tick_every: args.tick_interval,
            tickers_tx,
            orders_tx,
            portfolio_tx,
            watchlists_tx,
            events_tx,
        }
    }

    pub fn with_rollover(mut self, hook: Box<dyn RolloverHook>) -> Self {
        self.rollover = hook;
        self
    }

    pub fn with_recorder(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.recorder = Some(tx);
        self
    }

    pub fn spawn(self) -> (TerminalHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let handle = TerminalHandle {
            cmd_tx,
            events: self.events_tx.clone(),
            tickers: self.tickers_tx.subscribe(),
            orders: self.orders_tx.subscribe(),
            portfolio: self.portfolio_tx.subscribe(),
            watchlists: self.watchlists_tx.subscribe(),
        };
        (handle, tokio::spawn(self.run(cmd_rx)))
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        info!(tickers = self.feed.tickers().len(), watchlists = self.watchlists.lists().len(), "terminal: started");
        let mut tick = interval(self.tick_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.publish_watchlists();
        self.record(Event::Note("session started".into()));

        loop {
            let due = self.ledger.arm_fill(Instant::now());
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
                _ = tick.tick() => self.on_tick(),
                _ = sleep_until_due(due) => self.on_fill_due(),
            }
        }
        let open = self.ledger.open_orders().count();
        self.record(Event::Note(format!("session closed, {open} open orders dropped")));
        info!(open_orders = open, "terminal: stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::PlaceOrder { symbol, qty, price, side, reply } => {
                let result = self.ledger.place(&symbol, qty, price, side, Utc::now()).map_err(TerminalError::from);
                if let Ok(o) = &result {
                    if self.feed.ensure_ticker(&o.symbol, &mut self.rng) {
                        self.publish_tickers();
                    }
                    ORDERS.with_label_values(&["OPEN"]).inc();
                    self.record(Event::Order(o.clone()));
                    self.emit(TerminalEvent::OrderPlaced(o.clone()));
                    self.publish_orders();
                }
                self.respond("place", reply, result);
            }
            Command::CancelOrder { id, reply } => {
                let result = self.ledger.cancel(&id).map_err(TerminalError::from);
                if let Ok(o) = &result {
                    ORDERS.with_label_values(&["CANCELLED"]).inc();
                    self.record(Event::Order(o.clone()));
                    self.emit(TerminalEvent::OrderCancelled(o.clone()));
                    self.publish_orders();
                }
                self.respond("cancel", reply, result);
            }
            Command::ModifyOrder { id, qty, price, reply } => {
                let result = self.ledger.modify(&id, qty, price).map_err(TerminalError::from);
                if let Ok(o) = &result {
                    self.record(Event::Order(o.clone()));
                    self.emit(TerminalEvent::OrderModified(o.clone()));
                    self.publish_orders();
                }
                self.respond("modify", reply, result);
            }
            Command::SquareOff { symbol, reply } => {
                let result = self.portfolio.square_off(&normalize_symbol(&symbol)).map_err(TerminalError::from);
                if let Ok(h) = &result {
                    let change = PositionChange::Updated(h.clone());
                    self.record(Event::Position(change.clone()));
                    self.emit(TerminalEvent::Position(change));
                    self.publish_portfolio();
                }
                self.respond("square_off", reply, result);
            }
            Command::RollOver { symbol, reply } => {
                let result = self
                    .portfolio
                    .roll_over(&normalize_symbol(&symbol), self.rollover.as_mut())
                    .map_err(TerminalError::from);
                self.respond("roll_over", reply, result);
            }
            Command::SelectSymbol { symbol, reply } => {
                let symbol = normalize_symbol(&symbol);
                if self.feed.ensure_ticker(&symbol, &mut self.rng) {
                    self.publish_tickers();
                }
                let result = self
                    .feed
                    .get(&symbol)
                    .cloned()
                    .ok_or(TerminalError::UnknownSymbol(symbol));
                if let Ok(t) = &result {
                    self.emit(TerminalEvent::Ui(UiEvent::SymbolSelected { symbol: t.symbol.clone(), price: t.ltp }));
                }
                self.respond("select", reply, result);
            }
            Command::Navigate(view) => self.emit(TerminalEvent::Ui(UiEvent::Navigate(view))),
            Command::OpenCommandPalette => self.emit(TerminalEvent::Ui(UiEvent::OpenCommandPalette)),
            Command::CreateWatchlist { name, reply } => {
                let result = self.watchlists.create(&name, Utc::now().timestamp_millis()).map_err(TerminalError::from);
                self.after_watchlist_change(&result);
                self.respond("watchlist_create", reply, result);
            }
            Command::DeleteWatchlist { id, reply } => {
                let result = self.watchlists.delete(&id).map_err(TerminalError::from);
                self.after_watchlist_change(&result);
                self.respond("watchlist_delete", reply, result);
            }
            Command::RenameWatchlist { id, name, reply } => {
                let result = self.watchlists.rename(&id, &name).map_err(TerminalError::from);
                self.after_watchlist_change(&result);
                self.respond("watchlist_rename", reply, result);
            }
            Command::AddToWatchlist { id, symbol, reply } => {
                let result = self.watchlists.add_symbol(&id, &symbol).map_err(TerminalError::from);
                if result.is_ok() && self.feed.ensure_ticker(&symbol, &mut self.rng) {
                    self.publish_tickers();
                }
                self.after_watchlist_change(&result);
                self.respond("watchlist_add", reply, result);
            }
            Command::RemoveFromWatchlist { id, symbol, reply } => {
                let result = self.watchlists.remove_symbol(&id, &symbol).map_err(TerminalError::from);
                self.after_watchlist_change(&result);
                self.respond("watchlist_remove", reply, result);
            }
            Command::SetWatchlistColumns { id, columns, reply } => {
                let result = self.watchlists.set_columns(&id, columns).map_err(TerminalError::from);
                self.after_watchlist_change(&result);
                self.respond("watchlist_columns", reply, result);
            }
            // consumed by run()
            Command::Shutdown => {}
        }
    }

    fn on_tick(&mut self) {
        self.feed.tick(&mut self.rng);
        TICKS.inc();
        self.publish_tickers();
        self.publish_portfolio();
    }

    fn on_fill_due(&mut self) {
        let Some(order) = self.ledger.fire_fill(Instant::now()) else { return };
        ORDERS.with_label_values(&["FILLED"]).inc();
        self.record(Event::Fill(order.clone()));
        self.emit(TerminalEvent::OrderFilled(order));
        self.publish_orders();

        for r in self.portfolio.reconcile(self.ledger.filled_orders()) {
            match r.result {
                Ok(change) => {
                    self.record(Event::Position(change.clone()));
                    self.emit(TerminalEvent::Position(change));
                }
                Err(e) => {
                    debug!(id = %r.order_id, "fill not applied to holdings");
                    self.reject("reconcile", &TerminalError::from(e));
                }
            }
        }
        self.publish_portfolio();
    }

    fn after_watchlist_change<T>(&self, result: &Result<T, TerminalError>) {
        if result.is_ok() {
            self.publish_watchlists();
        }
    }

    fn respond<T>(&self, action: &'static str, reply: Reply<T>, result: Result<T, TerminalError>) {
        if let Err(e) = &result {
            self.reject(action, e);
        }
        let _ = reply.send(result);
    }

    fn reject(&self, action: &'static str, e: &TerminalError) {
        REJECTS.with_label_values(&[e.reason()]).inc();
        self.emit(TerminalEvent::Rejected { action, reason: e.to_string() });
    }

    fn emit(&self, ev: TerminalEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(ev);
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.recorder {
            let _ = tx.try_send(ev);
        }
    }

    fn publish_tickers(&self) {
        TICKERS.set(self.feed.tickers().len() as i64);
        self.tickers_tx.send_replace(self.feed.tickers().to_vec());
    }

    fn publish_orders(&self) {
        self.orders_tx.send_replace(self.ledger.orders().to_vec());
    }

    fn publish_portfolio(&self) {
        let holdings = self.portfolio.project(self.feed.tickers());
        let stats = portfolio::stats(&holdings);
        HOLDINGS.set(holdings.len() as i64);
        PNL_UNREALIZED.set(stats.total_pl);
        MARKET_VALUE.set(stats.total_market_value);
        self.portfolio_tx.send_replace(PortfolioSnapshot { holdings, stats });
    }

    fn publish_watchlists(&self) {
        WATCHLISTS.set(self.watchlists.lists().len() as i64);
        self.watchlists_tx.send_replace(self.watchlists.lists().to_vec());
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(d) => sleep_until(d).await,
        None => pending().await,
    }
}

/// Cloneable client of a running terminal.
#[derive(Clone)]
pub struct TerminalHandle {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<TerminalEvent>,
    tickers: watch::Receiver<Vec<Ticker>>,
    orders: watch::Receiver<Vec<Order>>,
    portfolio: watch::Receiver<PortfolioSnapshot>,
    watchlists: watch::Receiver<Vec<Watchlist>>,
}

impl TerminalHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, TerminalError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| TerminalError::Closed)?;
        rx.await.map_err(|_| TerminalError::Closed)?
    }

    async fn notify(&self, cmd: Command) -> Result<(), TerminalError> {
        self.cmd_tx.send(cmd).await.map_err(|_| TerminalError::Closed)
    }

    pub async fn place_order(&self, symbol: &str, qty: i64, price: f64, side: Side) -> Result<Order, TerminalError> {
        let symbol = symbol.to_string();
        self.request(|reply| Command::PlaceOrder { symbol, qty, price, side, reply }).await
    }

    pub async fn cancel_order(&self, id: &str) -> Result<Order, TerminalError> {
        let id = id.to_string();
        self.request(|reply| Command::CancelOrder { id, reply }).await
    }

    pub async fn modify_order(&self, id: &str, qty: i64, price: f64) -> Result<Order, TerminalError> {
        let id = id.to_string();
        self.request(|reply| Command::ModifyOrder { id, qty, price, reply }).await
    }

    pub async fn square_off(&self, symbol: &str) -> Result<Holding, TerminalError> {
        let symbol = symbol.to_string();
        self.request(|reply| Command::SquareOff { symbol, reply }).await
    }

    pub async fn roll_over(&self, symbol: &str) -> Result<(), TerminalError> {
        let symbol = symbol.to_string();
        self.request(|reply| Command::RollOver { symbol, reply }).await
    }

    pub async fn select_symbol(&self, symbol: &str) -> Result<Ticker, TerminalError> {
        let symbol = symbol.to_string();
        self.request(|reply| Command::SelectSymbol { symbol, reply }).await
    }

    pub async fn navigate(&self, view: View) -> Result<(), TerminalError> {
        self.notify(Command::Navigate(view)).await
    }

    pub async fn open_command_palette(&self) -> Result<(), TerminalError> {
        self.notify(Command::OpenCommandPalette).await
    }

    pub async fn create_watchlist(&self, name: &str) -> Result<Watchlist, TerminalError> {
        let name = name.to_string();
        self.request(|reply| Command::CreateWatchlist { name, reply }).await
    }

    pub async fn delete_watchlist(&self, id: &str) -> Result<(), TerminalError> {
        let id = id.to_string();
        self.request(|reply| Command::DeleteWatchlist { id, reply }).await
    }

    pub async fn rename_watchlist(&self, id: &str, name: &str) -> Result<Watchlist, TerminalError> {
        let (id, name) = (id.to_string(), name.to_string());
        self.request(|reply| Command::RenameWatchlist { id, name, reply }).await
    }

    pub async fn add_to_watchlist(&self, id: &str, symbol: &str) -> Result<bool, TerminalError> {
        let (id, symbol) = (id.to_string(), symbol.to_string());
        self.request(|reply| Command::AddToWatchlist { id, symbol, reply }).await
    }

    pub async fn remove_from_watchlist(&self, id: &str, symbol: &str) -> Result<bool, TerminalError> {
        let (id, symbol) = (id.to_string(), symbol.to_string());
        self.request(|reply| Command::RemoveFromWatchlist { id, symbol, reply }).await
    }

    pub async fn set_watchlist_columns(&self, id: &str, columns: Vec<String>) -> Result<(), TerminalError> {
        let id = id.to_string();
        self.request(|reply| Command::SetWatchlistColumns { id, columns, reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> { self.events.subscribe() }

    pub fn tickers(&self) -> Vec<Ticker> { self.tickers.borrow().clone() }

    pub fn orders(&self) -> Vec<Order> { self.orders.borrow().clone() }

    pub fn portfolio(&self) -> PortfolioSnapshot { self.portfolio.borrow().clone() }

    pub fn watchlists(&self) -> Vec<Watchlist> { self.watchlists.borrow().clone() }
}
