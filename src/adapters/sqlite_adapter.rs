//! SQLite store adapter.
//!
//! Writes run in `IMMEDIATE` transactions so the writer lock is taken before
//! any row is read; the plan computed from those rows therefore cannot go
//! stale before it is written back. Decimals are stored as canonical text.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::domain::account::{Account, BankLink, NewBankLink};
use crate::domain::calendar::{CalendarSettings, MarketHoliday, MarketHours, MarketSchedule};
use crate::domain::error::TradesimError;
use crate::domain::execution::{plan_order, Execution, FeeSchedule, Fill, OrderRequest};
use crate::domain::funds::{plan_dividend, plan_transfer, TransferRequest};
use crate::domain::instrument::{Instrument, Trend};
use crate::domain::ledger::{LedgerEntry, Order, Page, Side, Transaction, TransactionKind};
use crate::domain::position::{Position, PositionChange};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{InstrumentUpdate, TradingStore};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

const INSTRUMENT_COLUMNS: &str = "ticker, name, price, volume, trend, day_high, day_low";
const ORDER_COLUMNS: &str =
    "id, account_id, ticker, side, quantity, price, total, executed, created_at";
const TRANSACTION_COLUMNS: &str = "id, account_id, amount, kind, order_id, created_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    cash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS bank_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    institution TEXT NOT NULL,
    routing_number TEXT NOT NULL,
    account_number TEXT NOT NULL,
    funds TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instruments (
    ticker TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    price TEXT NOT NULL,
    volume INTEGER NOT NULL CHECK (volume >= 0),
    trend TEXT NOT NULL,
    day_high TEXT NOT NULL,
    day_low TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS positions (
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    ticker TEXT NOT NULL REFERENCES instruments(ticker),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    avg_price TEXT NOT NULL,
    PRIMARY KEY (account_id, ticker)
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    ticker TEXT NOT NULL REFERENCES instruments(ticker),
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price TEXT NOT NULL,
    total TEXT NOT NULL,
    executed INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    amount TEXT NOT NULL,
    kind TEXT NOT NULL,
    order_id INTEGER REFERENCES orders(id),
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS market_schedule (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    start_day TEXT NOT NULL,
    end_day TEXT NOT NULL,
    is_holiday INTEGER NOT NULL,
    note TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS market_hours (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    open_time TEXT NOT NULL,
    close_time TEXT NOT NULL,
    is_active INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS market_holidays (
    date TEXT PRIMARY KEY,
    label TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_account ON orders(account_id, created_at);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id, created_at);
CREATE INDEX IF NOT EXISTS idx_positions_ticker ON positions(ticker);";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> TradesimError {
    TradesimError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> TradesimError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        if matches!(
            failure.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ) {
            return TradesimError::ConcurrentModification {
                reason: e.to_string(),
            };
        }
    }
    TradesimError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Parse a text column, reporting failures as a conversion error on that column.
fn parse_column<T, E>(
    row: &Row<'_>,
    idx: usize,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    parse_column(row, idx, Decimal::from_str)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    parse_column(row, idx, |s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        cash: decimal_column(row, 2)?,
        created_at: timestamp_column(row, 3)?,
    })
}

fn bank_link_from_row(row: &Row<'_>) -> rusqlite::Result<BankLink> {
    Ok(BankLink {
        id: row.get(0)?,
        account_id: row.get(1)?,
        institution: row.get(2)?,
        routing_number: row.get(3)?,
        account_number: row.get(4)?,
        funds: decimal_column(row, 5)?,
    })
}

/// Instrument columns starting at `offset`, in `INSTRUMENT_COLUMNS` order.
fn instrument_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Instrument> {
    Ok(Instrument {
        ticker: row.get(offset)?,
        name: row.get(offset + 1)?,
        price: decimal_column(row, offset + 2)?,
        volume: row.get(offset + 3)?,
        trend: parse_column(row, offset + 4, Trend::from_str)?,
        day_high: decimal_column(row, offset + 5)?,
        day_low: decimal_column(row, offset + 6)?,
    })
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        account_id: row.get(0)?,
        ticker: row.get(1)?,
        quantity: row.get(2)?,
        avg_price: decimal_column(row, 3)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        account_id: row.get(1)?,
        ticker: row.get(2)?,
        side: parse_column(row, 3, Side::from_str)?,
        quantity: row.get(4)?,
        price: decimal_column(row, 5)?,
        total: decimal_column(row, 6)?,
        executed: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount: decimal_column(row, 2)?,
        kind: parse_column(row, 3, TransactionKind::from_str)?,
        order_id: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

fn load_account(conn: &Connection, account_id: i64) -> Result<Account, TradesimError> {
    conn.query_row(
        "SELECT id, user_id, cash, created_at FROM accounts WHERE id = ?1",
        params![account_id],
        account_from_row,
    )
    .optional()
    .map_err(query_err)?
    .ok_or(TradesimError::UnknownAccount { account_id })
}

fn save_account_cash(conn: &Connection, account: &Account) -> Result<(), TradesimError> {
    conn.execute(
        "UPDATE accounts SET cash = ?1 WHERE id = ?2",
        params![account.cash.to_string(), account.id],
    )
    .map_err(query_err)?;
    Ok(())
}

fn load_instrument(conn: &Connection, ticker: &str) -> Result<Instrument, TradesimError> {
    let sql = format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments WHERE ticker = ?1");
    conn.query_row(&sql, params![ticker], |row| instrument_from_row(row, 0))
        .optional()
        .map_err(query_err)?
        .ok_or_else(|| TradesimError::UnknownInstrument {
            ticker: ticker.to_string(),
        })
}

fn save_instrument(conn: &Connection, instrument: &Instrument) -> Result<(), TradesimError> {
    conn.execute(
        "UPDATE instruments
         SET price = ?1, volume = ?2, trend = ?3, day_high = ?4, day_low = ?5
         WHERE ticker = ?6",
        params![
            instrument.price.to_string(),
            instrument.volume,
            instrument.trend.as_str(),
            instrument.day_high.to_string(),
            instrument.day_low.to_string(),
            instrument.ticker
        ],
    )
    .map_err(query_err)?;
    Ok(())
}

fn load_position(
    conn: &Connection,
    account_id: i64,
    ticker: &str,
) -> Result<Option<Position>, TradesimError> {
    conn.query_row(
        "SELECT account_id, ticker, quantity, avg_price
         FROM positions WHERE account_id = ?1 AND ticker = ?2",
        params![account_id, ticker],
        position_from_row,
    )
    .optional()
    .map_err(query_err)
}

fn apply_position_change(
    conn: &Connection,
    change: &PositionChange,
) -> Result<Option<Position>, TradesimError> {
    match change {
        PositionChange::Upsert(position) => {
            conn.execute(
                "INSERT INTO positions (account_id, ticker, quantity, avg_price)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(account_id, ticker)
                 DO UPDATE SET quantity = excluded.quantity, avg_price = excluded.avg_price",
                params![
                    position.account_id,
                    position.ticker,
                    position.quantity,
                    position.avg_price.to_string()
                ],
            )
            .map_err(query_err)?;
            Ok(Some(position.clone()))
        }
        PositionChange::Delete { account_id, ticker } => {
            conn.execute(
                "DELETE FROM positions WHERE account_id = ?1 AND ticker = ?2",
                params![account_id, ticker],
            )
            .map_err(query_err)?;
            Ok(None)
        }
    }
}

fn insert_order(
    conn: &Connection,
    account_id: i64,
    fill: &Fill,
    now: NaiveDateTime,
) -> Result<Order, TradesimError> {
    conn.execute(
        "INSERT INTO orders (account_id, ticker, side, quantity, price, total, executed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            account_id,
            fill.instrument.ticker,
            fill.side.as_str(),
            fill.quantity,
            fill.price.to_string(),
            fill.gross.to_string(),
            format_timestamp(now)
        ],
    )
    .map_err(query_err)?;
    Ok(Order {
        id: conn.last_insert_rowid(),
        account_id,
        ticker: fill.instrument.ticker.clone(),
        side: fill.side,
        quantity: fill.quantity,
        price: fill.price,
        total: fill.gross,
        executed: true,
        created_at: now,
    })
}

fn insert_transaction(
    conn: &Connection,
    account_id: i64,
    entry: &LedgerEntry,
    order_id: Option<i64>,
    now: NaiveDateTime,
) -> Result<Transaction, TradesimError> {
    let amount = entry.signed_amount();
    conn.execute(
        "INSERT INTO transactions (account_id, amount, kind, order_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            account_id,
            amount.to_string(),
            entry.kind.as_str(),
            order_id,
            format_timestamp(now)
        ],
    )
    .map_err(query_err)?;
    Ok(Transaction {
        id: conn.last_insert_rowid(),
        account_id,
        amount,
        kind: entry.kind,
        order_id,
        created_at: now,
    })
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradesimError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| TradesimError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        let busy_timeout_ms = config.get_int("sqlite", "busy_timeout_ms", 5_000).max(0) as u64;

        Self::open(db_path, pool_size, Duration::from_millis(busy_timeout_ms))
    }

    pub fn open<P: AsRef<Path>>(
        path: P,
        pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, TradesimError> {
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// since dropping it would drop the data.
    pub fn in_memory() -> Result<Self, TradesimError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradesimError> {
        self.pool.get().map_err(pool_err)
    }

    /// Create tables and seed the calendar singletons. Safe to run repeatedly.
    pub fn initialize_schema(&self) -> Result<(), TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        tx.execute_batch(SCHEMA).map_err(query_err)?;

        let schedule = MarketSchedule::default();
        tx.execute(
            "INSERT OR IGNORE INTO market_schedule (id, start_day, end_day, is_holiday, note)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                schedule.start_day.to_string(),
                schedule.end_day.to_string(),
                schedule.is_holiday,
                schedule.note
            ],
        )
        .map_err(query_err)?;

        let hours = MarketHours::default();
        tx.execute(
            "INSERT OR IGNORE INTO market_hours (id, open_time, close_time, is_active)
             VALUES (1, ?1, ?2, ?3)",
            params![
                hours.open.format(TIME_FORMAT).to_string(),
                hours.close.format(TIME_FORMAT).to_string(),
                hours.is_active
            ],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

impl TradingStore for SqliteStore {
    fn open_account(
        &self,
        user_id: &str,
        opening_cash: Decimal,
        now: NaiveDateTime,
    ) -> Result<Account, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if existing.is_some() {
            return Err(TradesimError::invalid_input(format!(
                "user {user_id} already has an account"
            )));
        }

        tx.execute(
            "INSERT INTO accounts (user_id, cash, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, opening_cash.to_string(), format_timestamp(now)],
        )
        .map_err(query_err)?;
        let account = Account {
            id: tx.last_insert_rowid(),
            user_id: user_id.to_string(),
            cash: opening_cash,
            created_at: now,
        };

        tx.commit().map_err(query_err)?;
        Ok(account)
    }

    fn account(&self, account_id: i64) -> Result<Account, TradesimError> {
        let conn = self.conn()?;
        load_account(&conn, account_id)
    }

    fn account_by_user(&self, user_id: &str) -> Result<Option<Account>, TradesimError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, cash, created_at FROM accounts WHERE user_id = ?1",
            params![user_id],
            account_from_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn link_bank(&self, account_id: i64, link: &NewBankLink) -> Result<BankLink, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        load_account(&tx, account_id)?;
        tx.execute(
            "INSERT INTO bank_links (account_id, institution, routing_number, account_number, funds)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account_id,
                link.institution.trim(),
                link.routing_number.trim(),
                link.account_number.trim(),
                link.funds.to_string()
            ],
        )
        .map_err(query_err)?;
        let bank_link = BankLink {
            id: tx.last_insert_rowid(),
            account_id,
            institution: link.institution.trim().to_string(),
            routing_number: link.routing_number.trim().to_string(),
            account_number: link.account_number.trim().to_string(),
            funds: link.funds,
        };

        tx.commit().map_err(query_err)?;
        Ok(bank_link)
    }

    fn bank_links(&self, account_id: i64) -> Result<Vec<BankLink>, TradesimError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, account_id, institution, routing_number, account_number, funds
                 FROM bank_links WHERE account_id = ?1 ORDER BY id",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![account_id], bank_link_from_row)
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn create_instrument(&self, instrument: &Instrument) -> Result<(), TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT ticker FROM instruments WHERE ticker = ?1",
                params![instrument.ticker],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if exists.is_some() {
            return Err(TradesimError::DuplicateTicker {
                ticker: instrument.ticker.clone(),
            });
        }

        let sql = format!("INSERT INTO instruments ({INSTRUMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
        tx.execute(
            &sql,
            params![
                instrument.ticker,
                instrument.name,
                instrument.price.to_string(),
                instrument.volume,
                instrument.trend.as_str(),
                instrument.day_high.to_string(),
                instrument.day_low.to_string()
            ],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    fn instrument(&self, ticker: &str) -> Result<Instrument, TradesimError> {
        let conn = self.conn()?;
        load_instrument(&conn, ticker)
    }

    fn list_instruments(&self, page: Page) -> Result<Vec<Instrument>, TradesimError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {INSTRUMENT_COLUMNS} FROM instruments ORDER BY ticker LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params![page.limit, page.offset], |row| {
                instrument_from_row(row, 0)
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn tickers(&self) -> Result<Vec<String>, TradesimError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT ticker FROM instruments ORDER BY ticker")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn update_instrument(
        &self,
        ticker: &str,
        update: InstrumentUpdate<'_>,
    ) -> Result<Instrument, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let mut instrument = load_instrument(&tx, ticker)?;
        update(&mut instrument)?;
        save_instrument(&tx, &instrument)?;

        tx.commit().map_err(query_err)?;
        Ok(instrument)
    }

    fn execute_order(
        &self,
        request: &OrderRequest,
        fees: &FeeSchedule,
        now: NaiveDateTime,
    ) -> Result<Execution, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let instrument = load_instrument(&tx, &request.ticker)?;
        let account = load_account(&tx, request.account_id)?;
        let position = load_position(&tx, request.account_id, &request.ticker)?;

        let fill = plan_order(account, instrument, position, request, fees)?;

        save_account_cash(&tx, &fill.account)?;
        save_instrument(&tx, &fill.instrument)?;
        let position_after = apply_position_change(&tx, &fill.position)?;
        let order = insert_order(&tx, request.account_id, &fill, now)?;

        let (settlement_entry, fee_entries) =
            fill.entries
                .split_first()
                .ok_or_else(|| TradesimError::DatabaseQuery {
                    reason: "order produced no ledger entry".into(),
                })?;
        let settlement =
            insert_transaction(&tx, request.account_id, settlement_entry, Some(order.id), now)?;
        let fee = match fee_entries.first() {
            Some(entry) => Some(insert_transaction(
                &tx,
                request.account_id,
                entry,
                Some(order.id),
                now,
            )?),
            None => None,
        };

        tx.commit().map_err(query_err)?;
        debug!(order_id = order.id, "order committed");

        Ok(Execution {
            order,
            settlement,
            fee,
            cash_after: fill.account.cash,
            position_after,
        })
    }

    fn transfer_funds(
        &self,
        request: &TransferRequest,
        now: NaiveDateTime,
    ) -> Result<Transaction, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let account = load_account(&tx, request.account_id)?;
        let bank_link = tx
            .query_row(
                "SELECT id, account_id, institution, routing_number, account_number, funds
                 FROM bank_links WHERE id = ?1",
                params![request.bank_link_id],
                bank_link_from_row,
            )
            .optional()
            .map_err(query_err)?
            .ok_or(TradesimError::UnknownBankLink {
                account_id: request.account_id,
                bank_link_id: request.bank_link_id,
            })?;

        let plan = plan_transfer(account, bank_link, request)?;

        save_account_cash(&tx, &plan.account)?;
        tx.execute(
            "UPDATE bank_links SET funds = ?1 WHERE id = ?2",
            params![plan.bank_link.funds.to_string(), plan.bank_link.id],
        )
        .map_err(query_err)?;
        let transaction = insert_transaction(&tx, plan.account.id, &plan.entry, None, now)?;

        tx.commit().map_err(query_err)?;
        Ok(transaction)
    }

    fn pay_dividend(
        &self,
        ticker: &str,
        per_share: Decimal,
        now: NaiveDateTime,
    ) -> Result<Vec<Transaction>, TradesimError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        load_instrument(&tx, ticker)?;
        let holders = {
            let mut stmt = tx
                .prepare(
                    "SELECT account_id, ticker, quantity, avg_price
                     FROM positions WHERE ticker = ?1 ORDER BY account_id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map(params![ticker], position_from_row)
                .map_err(query_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?
        };

        let mut transactions = Vec::new();
        for payment in plan_dividend(&holders, per_share)? {
            let mut account = load_account(&tx, payment.account_id)?;
            account.credit(payment.amount)?;
            save_account_cash(&tx, &account)?;
            let entry = LedgerEntry::new(TransactionKind::Dividend, payment.amount);
            transactions.push(insert_transaction(&tx, account.id, &entry, None, now)?);
        }

        tx.commit().map_err(query_err)?;
        Ok(transactions)
    }

    fn position(&self, account_id: i64, ticker: &str) -> Result<Option<Position>, TradesimError> {
        let conn = self.conn()?;
        load_position(&conn, account_id, ticker)
    }

    fn positions(&self, account_id: i64) -> Result<Vec<(Position, Instrument)>, TradesimError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT p.account_id, p.ticker, p.quantity, p.avg_price,
                    i.{}
             FROM positions p JOIN instruments i ON i.ticker = p.ticker
             WHERE p.account_id = ?1
             ORDER BY p.ticker",
            INSTRUMENT_COLUMNS.replace(", ", ", i.")
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok((position_from_row(row)?, instrument_from_row(row, 4)?))
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn orders(&self, account_id: i64, page: Page) -> Result<Vec<Order>, TradesimError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE account_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params![account_id, page.limit, page.offset], order_from_row)
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn transactions(&self, account_id: i64, page: Page) -> Result<Vec<Transaction>, TradesimError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![account_id, page.limit, page.offset],
                transaction_from_row,
            )
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn calendar_settings(&self) -> Result<CalendarSettings, TradesimError> {
        let conn = self.conn()?;

        let schedule = conn
            .query_row(
                "SELECT start_day, end_day, is_holiday, note FROM market_schedule WHERE id = 1",
                [],
                |row| {
                    Ok(MarketSchedule {
                        start_day: parse_column(row, 0, Weekday::from_str)?,
                        end_day: parse_column(row, 1, Weekday::from_str)?,
                        is_holiday: row.get(2)?,
                        note: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)?
            .unwrap_or_default();

        let hours = conn
            .query_row(
                "SELECT open_time, close_time, is_active FROM market_hours WHERE id = 1",
                [],
                |row| {
                    Ok(MarketHours {
                        open: parse_column(row, 0, |s| NaiveTime::parse_from_str(s, TIME_FORMAT))?,
                        close: parse_column(row, 1, |s| {
                            NaiveTime::parse_from_str(s, TIME_FORMAT)
                        })?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)?
            .unwrap_or_default();

        let mut stmt = conn
            .prepare("SELECT date, label FROM market_holidays ORDER BY date")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MarketHoliday {
                    date: parse_column(row, 0, |s| NaiveDate::parse_from_str(s, DATE_FORMAT))?,
                    label: row.get(1)?,
                })
            })
            .map_err(query_err)?;
        let holidays = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;

        Ok(CalendarSettings {
            schedule,
            hours,
            holidays,
        })
    }

    fn set_market_hours(&self, hours: &MarketHours) -> Result<(), TradesimError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO market_hours (id, open_time, close_time, is_active)
             VALUES (1, ?1, ?2, ?3)",
            params![
                hours.open.format(TIME_FORMAT).to_string(),
                hours.close.format(TIME_FORMAT).to_string(),
                hours.is_active
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn set_market_schedule(&self, schedule: &MarketSchedule) -> Result<(), TradesimError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO market_schedule (id, start_day, end_day, is_holiday, note)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                schedule.start_day.to_string(),
                schedule.end_day.to_string(),
                schedule.is_holiday,
                schedule.note
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn add_holiday(&self, holiday: &MarketHoliday) -> Result<(), TradesimError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO market_holidays (date, label) VALUES (?1, ?2)",
            params![holiday.date.format(DATE_FORMAT).to_string(), holiday.label],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn remove_holiday(&self, date: NaiveDate) -> Result<bool, TradesimError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM market_holidays WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
            )
            .map_err(query_err)?;
        Ok(removed > 0)
    }
}
