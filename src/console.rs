// ===============================
// src/console.rs (line-oriented driver for a running terminal)
// ===============================
//
//   buy RELIANCE 10 2400      sell TCS 5 3600
//   cancel <id>               modify <id> <qty> <price>
//   orders | holdings | quotes | watchlists
//   square-off <sym>          rollover <sym>
//   select <sym>              goto portfolio      palette
//   watch add <id> <sym>      watch remove <id> <sym>
//   watch create <name>       watch rename <id> <name>    watch delete <id>
//   watch columns <id> ltp change volume
//   quit
//

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::domain::{Side, View};
use crate::terminal::{TerminalError, TerminalHandle};

#[derive(Debug, Parser)]
#[command(name = "ledgerone", no_binary_name = true, disable_help_flag = true)]
struct Line {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    Buy { symbol: String, qty: i64, price: f64 },
    Sell { symbol: String, qty: i64, price: f64 },
    Cancel { id: String },
    Modify { id: String, qty: i64, price: f64 },
    Orders,
    Holdings,
    Quotes,
    SquareOff { symbol: String },
    Rollover { symbol: String },
    Select { symbol: String },
    Goto { view: View },
    Palette,
    Watchlists,
    #[command(subcommand)]
    Watch(WatchCmd),
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Subcommand)]
enum WatchCmd {
    Add { id: String, symbol: String },
    Remove { id: String, symbol: String },
    Create { name: Vec<String> },
    Rename { id: String, name: Vec<String> },
    Delete { id: String },
    Columns { id: String, columns: Vec<String> },
}

/// Result of one console line.
#[derive(Debug, PartialEq)]
pub enum Outcome { Continue, Quit }

fn parse(line: &str) -> Result<Cmd, clap::Error> {
    Line::try_parse_from(line.split_whitespace()).map(|l| l.cmd)
}

pub async fn run<R>(handle: TerminalHandle, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    println!("ledgerone ready. type `help` for commands");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                eprintln!("stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if exec(&handle, &line).await == Outcome::Quit {
            break;
        }
    }
    debug!("console: input closed");
}

pub async fn exec(h: &TerminalHandle, line: &str) -> Outcome {
    let cmd = match parse(line) {
        Ok(c) => c,
        Err(e) => {
            println!("{}", e.render());
            return Outcome::Continue;
        }
    };
    match dispatch(h, cmd).await {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("error: {e}");
            Outcome::Continue
        }
    }
}

async fn dispatch(h: &TerminalHandle, cmd: Cmd) -> Result<Outcome, TerminalError> {
    match cmd {
        Cmd::Buy { symbol, qty, price } => {
            let o = h.place_order(&symbol, qty, price, Side::Buy).await?;
            println!("{} {} {} {} @ {:.2} {}", o.id, o.side, o.qty, o.symbol, o.price, o.status);
        }
        Cmd::Sell { symbol, qty, price } => {
            let o = h.place_order(&symbol, qty, price, Side::Sell).await?;
            println!("{} {} {} {} @ {:.2} {}", o.id, o.side, o.qty, o.symbol, o.price, o.status);
        }
        Cmd::Cancel { id } => {
            let o = h.cancel_order(&id).await?;
            println!("{} {}", o.id, o.status);
        }
        Cmd::Modify { id, qty, price } => {
            let o = h.modify_order(&id, qty, price).await?;
            println!("{} qty={} px={:.2}", o.id, o.qty, o.price);
        }
        Cmd::Orders => {
            println!("{:<22} {:<8} {:<12} {:>6} {:>10} {:<9} {}", "ID", "TIME", "SYMBOL", "QTY", "PRICE", "STATUS", "SIDE");
            for o in h.orders() {
                println!("{:<22} {:<8} {:<12} {:>6} {:>10.2} {:<9} {}", o.id, o.time, o.symbol, o.qty, o.price, o.status, o.side);
            }
        }
        Cmd::Holdings => {
            let p = h.portfolio();
            println!("{:<12} {:>6} {:>10} {:>10} {:>12} {:>8}", "SYMBOL", "QTY", "AVG", "LTP", "P&L", "%");
            for v in &p.holdings {
                println!(
                    "{:<12} {:>6} {:>10.2} {:>10.2} {:>12.2} {:>8.2}",
                    v.symbol, v.qty, v.avg_cost, v.current_price, v.unrealized_pl, v.pl_percentage
                );
            }
            println!(
                "value {:.2}  invested {:.2}  P&L {:.2} ({:.2}%)",
                p.stats.total_market_value, p.stats.total_invested, p.stats.total_pl, p.stats.pl_percentage
            );
        }
        Cmd::Quotes => {
            for t in h.tickers() {
                println!("{:<12} {:>10.2} {:>+7.2}% {:>8}", t.symbol, t.ltp, t.change, t.volume);
            }
        }
        Cmd::SquareOff { symbol } => {
            let hd = h.square_off(&symbol).await?;
            println!("{} squared off", hd.symbol);
        }
        Cmd::Rollover { symbol } => h.roll_over(&symbol).await?,
        Cmd::Select { symbol } => {
            let t = h.select_symbol(&symbol).await?;
            println!("{} {:.2}", t.symbol, t.ltp);
        }
        Cmd::Goto { view } => h.navigate(view).await?,
        Cmd::Palette => h.open_command_palette().await?,
        Cmd::Watchlists => {
            for w in h.watchlists() {
                println!("[{}] {}: {}", w.id, w.name, w.symbols.join(", "));
            }
        }
        Cmd::Watch(w) => match w {
            WatchCmd::Add { id, symbol } => {
                if !h.add_to_watchlist(&id, &symbol).await? {
                    println!("already watching {symbol}");
                }
            }
            WatchCmd::Remove { id, symbol } => {
                h.remove_from_watchlist(&id, &symbol).await?;
            }
            WatchCmd::Create { name } => {
                let w = h.create_watchlist(&name.join(" ")).await?;
                println!("created [{}] {}", w.id, w.name);
            }
            WatchCmd::Rename { id, name } => {
                h.rename_watchlist(&id, &name.join(" ")).await?;
            }
            WatchCmd::Delete { id } => h.delete_watchlist(&id).await?,
            WatchCmd::Columns { id, columns } => h.set_watchlist_columns(&id, columns).await?,
        },
        Cmd::Quit => return Ok(Outcome::Quit),
    }
    Ok(Outcome::Continue)
}
