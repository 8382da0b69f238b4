//! CLI definition and dispatch.

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::clock_adapter::SystemClock;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::{load_exchange_settings, load_simulation_config};
use crate::domain::error::TradesimError;
use crate::domain::exchange::Exchange;
use crate::domain::execution::Execution;
use crate::domain::instrument::NewInstrument;
use crate::domain::ledger::Page;
use crate::domain::calendar::{parse_date, parse_time, parse_weekday};
use crate::domain::simulation::Simulator;
use crate::ports::clock_port::ClockPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::TradingStore;

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Simulated retail trading venue")]
pub struct Cli {
    #[arg(short, long, global = true, default_value = "tradesim.ini")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct PageArgs {
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    #[arg(long, default_value_t = Page::DEFAULT_LIMIT)]
    pub limit: u32,
    #[arg(long)]
    pub json: bool,
}

impl PageArgs {
    fn page(&self) -> Page {
        Page::new(self.offset, self.limit)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database schema
    Init,
    /// Run the price simulation until interrupted
    Serve,
    /// Open a trading account for a user
    OpenAccount {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "0")]
        cash: Decimal,
    },
    /// Link a bank account seeded with the default funds
    LinkBank {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        institution: String,
        #[arg(long)]
        routing: String,
        #[arg(long)]
        number: String,
    },
    /// List a new instrument
    CreateInstrument {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        volume: i64,
    },
    /// Move funds from a bank link into the account
    Deposit {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        bank_link: i64,
        #[arg(long)]
        amount: Decimal,
    },
    /// Move funds from the account back to a bank link
    Withdraw {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        bank_link: i64,
        #[arg(long)]
        amount: Decimal,
    },
    /// Buy shares at the current price
    Buy {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        quantity: i64,
    },
    /// Sell shares at the current price
    Sell {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        quantity: i64,
    },
    /// Show cash, holdings and equity
    Portfolio {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show the cash ledger, newest first
    History {
        #[arg(long)]
        account: i64,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Show executed orders, newest first
    Orders {
        #[arg(long)]
        account: i64,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Show linked bank accounts
    BankLinks {
        #[arg(long)]
        account: i64,
    },
    /// List instruments by ticker
    Instruments {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Report whether the market is open
    MarketStatus {
        /// Local time to evaluate instead of now, as "YYYY-MM-DD HH:MM"
        #[arg(long)]
        at: Option<String>,
    },
    /// List ad-hoc market holidays
    Holidays,
    /// Close the market for a day
    AddHoliday {
        #[arg(long)]
        date: String,
        #[arg(long)]
        label: String,
    },
    /// Reopen a day closed by a holiday
    RemoveHoliday {
        #[arg(long)]
        date: String,
    },
    /// Set the daily trading window
    SetHours {
        #[arg(long)]
        open: String,
        #[arg(long)]
        close: String,
        #[arg(long)]
        inactive: bool,
    },
    /// Set the weekly trading window
    SetSchedule {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        holiday: bool,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Reassign every instrument's trend now
    AssignTrends,
    /// Apply one price tick now
    Tick,
    /// Reset every daily high/low now
    DailyReset,
    /// Pay a per-share dividend to every holder
    PayDividend {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        per_share: Decimal,
    },
}

/// Wired exchange and simulator for one process.
pub struct Venue {
    pub exchange: Arc<Exchange>,
    pub simulator: Arc<Simulator>,
}

pub fn build_venue(
    config: &dyn ConfigPort,
    store: Arc<dyn TradingStore>,
    clock: Arc<dyn ClockPort>,
) -> Result<Venue, TradesimError> {
    let settings = load_exchange_settings(config)?;
    let simulation = load_simulation_config(config)?;
    let exchange = Arc::new(Exchange::new(store, clock, settings));
    let simulator = Arc::new(Simulator::new(exchange.clone(), simulation));
    Ok(Venue {
        exchange,
        simulator,
    })
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TradesimError> {
    FileConfigAdapter::from_file(path).map_err(|e| TradesimError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(feature = "sqlite")]
pub fn open_store(config: &dyn ConfigPort) -> Result<Arc<dyn TradingStore>, TradesimError> {
    use crate::adapters::sqlite_adapter::SqliteStore;

    let store = SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
pub fn open_store(_config: &dyn ConfigPort) -> Result<Arc<dyn TradingStore>, TradesimError> {
    Err(TradesimError::Database {
        reason: "sqlite feature is required".into(),
    })
}

pub fn run(cli: Cli) -> ExitCode {
    let Cli { config, command } = cli;
    let result = load_config(&config).and_then(|cfg| {
        let store = open_store(&cfg)?;
        let venue = build_venue(&cfg, store, Arc::new(SystemClock))?;
        dispatch(&venue, command)
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TradesimError> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

fn print_execution(exec: &Execution) {
    println!(
        "order {}: {} {} {} @ {} = {}",
        exec.order.id,
        exec.order.side,
        exec.order.quantity,
        exec.order.ticker,
        exec.order.price,
        exec.order.total
    );
    if let Some(fee) = &exec.fee {
        println!("commission: {}", -fee.amount);
    }
    println!("cash: {}", exec.cash_after);
    match &exec.position_after {
        Some(p) => println!("position: {} {} @ avg {}", p.quantity, p.ticker, p.avg_price),
        None => println!("position: closed"),
    }
}

fn parse_local_datetime(input: &str) -> Result<NaiveDateTime, TradesimError> {
    NaiveDateTime::parse_from_str(input.trim(), "%Y-%m-%d %H:%M").map_err(|_| {
        TradesimError::invalid_input(format!("invalid time '{input}' (expected YYYY-MM-DD HH:MM)"))
    })
}

pub fn dispatch(venue: &Venue, command: Command) -> Result<(), TradesimError> {
    let exchange = &venue.exchange;
    match command {
        Command::Init => {
            println!("schema ready");
        }
        Command::Serve => run_serve(venue)?,
        Command::OpenAccount { user, cash } => {
            let account = exchange.open_account(&user, cash)?;
            println!("account {} opened for {} with cash {}", account.id, account.user_id, account.cash);
        }
        Command::LinkBank {
            account,
            institution,
            routing,
            number,
        } => {
            let link = exchange.link_bank(account, &institution, &routing, &number)?;
            println!(
                "bank link {} ({} {}) funds {}",
                link.id,
                link.institution,
                link.masked_account_number(),
                link.funds
            );
        }
        Command::CreateInstrument {
            ticker,
            name,
            price,
            volume,
        } => {
            let inst = exchange.create_instrument(NewInstrument {
                ticker,
                name,
                price,
                volume,
            })?;
            println!("listed {} at {} ({} shares)", inst.ticker, inst.price, inst.volume);
        }
        Command::Deposit {
            account,
            bank_link,
            amount,
        } => {
            let tx = exchange.deposit(account, bank_link, amount)?;
            println!("{} {} (transaction {})", tx.kind, tx.amount, tx.id);
        }
        Command::Withdraw {
            account,
            bank_link,
            amount,
        } => {
            let tx = exchange.withdraw(account, bank_link, amount)?;
            println!("{} {} (transaction {})", tx.kind, tx.amount, tx.id);
        }
        Command::Buy {
            account,
            ticker,
            quantity,
        } => print_execution(&exchange.buy(account, &ticker, quantity)?),
        Command::Sell {
            account,
            ticker,
            quantity,
        } => print_execution(&exchange.sell(account, &ticker, quantity)?),
        Command::Portfolio { account, json } => {
            let view = exchange.portfolio(account)?;
            if json {
                print_json(&view)?;
            } else {
                println!("account {} ({})", view.account_id, view.user_id);
                println!("cash: {}", view.cash);
                for h in &view.holdings {
                    println!(
                        "  {:<5} {:>8} @ {:>10} avg {:>10} value {:>12} pnl {:>10}",
                        h.ticker, h.quantity, h.price, h.avg_price, h.market_value, h.unrealized_pnl
                    );
                }
                println!("equity: {}", view.total_equity());
            }
        }
        Command::History { account, page } => {
            let history = exchange.transaction_history(account, page.page())?;
            if page.json {
                print_json(&history)?;
            } else {
                for tx in &history {
                    let order = tx.order_id.map(|id| format!(" order {id}")).unwrap_or_default();
                    println!("{}  {:<10} {:>12}{}", tx.created_at, tx.kind, tx.amount, order);
                }
            }
        }
        Command::Orders { account, page } => {
            let orders = exchange.order_history(account, page.page())?;
            if page.json {
                print_json(&orders)?;
            } else {
                for o in &orders {
                    println!(
                        "{}  #{} {} {} {} @ {} = {}",
                        o.created_at, o.id, o.side, o.quantity, o.ticker, o.price, o.total
                    );
                }
            }
        }
        Command::BankLinks { account } => {
            for link in exchange.bank_links(account)? {
                println!(
                    "{}  {} {} funds {}",
                    link.id,
                    link.institution,
                    link.masked_account_number(),
                    link.funds
                );
            }
        }
        Command::Instruments { page } => {
            let instruments = exchange.list_instruments(page.page())?;
            if page.json {
                print_json(&instruments)?;
            } else {
                for i in &instruments {
                    println!(
                        "{:<5} {:<24} {:>10} high {:>10} low {:>10} vol {:>10} {}",
                        i.ticker, i.name, i.price, i.day_high, i.day_low, i.volume, i.trend
                    );
                }
            }
        }
        Command::MarketStatus { at } => {
            let when = match at {
                Some(raw) => parse_local_datetime(&raw)?,
                None => exchange.now(),
            };
            match exchange.closure_reason_at(when)? {
                None => println!("{when}: open"),
                Some(reason) => println!("{when}: closed ({reason})"),
            }
        }
        Command::Holidays => {
            for h in exchange.holidays()? {
                println!("{}  {}", h.date, h.label);
            }
        }
        Command::AddHoliday { date, label } => {
            let holiday = exchange.add_holiday(parse_date(&date)?, &label)?;
            println!("holiday {} added: {}", holiday.date, holiday.label);
        }
        Command::RemoveHoliday { date } => {
            let date = parse_date(&date)?;
            if exchange.remove_holiday(date)? {
                println!("holiday {date} removed");
            } else {
                println!("no holiday on {date}");
            }
        }
        Command::SetHours {
            open,
            close,
            inactive,
        } => {
            let hours = exchange.set_market_hours(parse_time(&open)?, parse_time(&close)?, !inactive)?;
            println!(
                "hours {}-{} ({})",
                hours.open.format("%H:%M"),
                hours.close.format("%H:%M"),
                if hours.is_active { "active" } else { "inactive" }
            );
        }
        Command::SetSchedule {
            start,
            end,
            holiday,
            note,
        } => {
            let schedule = exchange.set_market_schedule(
                parse_weekday(&start)?,
                parse_weekday(&end)?,
                holiday,
                &note,
            )?;
            println!("schedule {}-{}", schedule.start_day, schedule.end_day);
        }
        Command::AssignTrends => println!("{}", venue.simulator.assign_trends()?),
        Command::Tick => println!("{}", venue.simulator.price_tick()?),
        Command::DailyReset => println!("{}", venue.simulator.daily_reset()?),
        Command::PayDividend { ticker, per_share } => {
            let paid = exchange.pay_dividend(&ticker, per_share)?;
            let total: Decimal = paid.iter().map(|t| t.amount).sum();
            println!("paid {total} to {} holders", paid.len());
        }
    }
    Ok(())
}

fn run_serve(venue: &Venue) -> Result<(), TradesimError> {
    let runtime = tokio::runtime::Runtime::new()?;
    let simulator = venue.simulator.clone();
    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let runner = tokio::spawn(crate::runner::run(simulator, shutdown_rx));

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
        runner.await.map_err(std::io::Error::other)?;
        Ok::<(), TradesimError>(())
    })
}
