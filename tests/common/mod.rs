#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tradesim::adapters::clock_adapter::FixedClock;
use tradesim::adapters::sqlite_adapter::SqliteStore;
use tradesim::domain::account::{Account, BankLink, NewBankLink};
use tradesim::domain::calendar::{CalendarSettings, MarketHoliday, MarketHours, MarketSchedule};
use tradesim::domain::error::TradesimError;
use tradesim::domain::exchange::{Exchange, ExchangeSettings};
use tradesim::domain::execution::{Execution, FeeSchedule, OrderRequest};
use tradesim::domain::funds::TransferRequest;
use tradesim::domain::instrument::{Instrument, NewInstrument};
use tradesim::domain::ledger::{Order, Page, Transaction};
use tradesim::domain::position::Position;
use tradesim::domain::simulation::{SimulationConfig, Simulator};
use tradesim::ports::store_port::{InstrumentUpdate, TradingStore};

/// Wednesday 2024-01-10 at the given local time.
pub fn wednesday(hour: u32, minute: u32) -> NaiveDateTime {
    at(2024, 1, 10, hour, minute)
}

pub fn at(y: i32, m: u32, d: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn memory_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize_schema().unwrap();
    store
}

pub struct TestVenue {
    pub exchange: Arc<Exchange>,
    pub simulator: Arc<Simulator>,
    pub clock: Arc<FixedClock>,
}

impl TestVenue {
    /// In-memory venue with default settings, clock on an open Wednesday morning.
    pub fn new() -> Self {
        Self::with_settings(ExchangeSettings::default())
    }

    pub fn with_settings(settings: ExchangeSettings) -> Self {
        Self::build(Arc::new(memory_store()), settings, SimulationConfig::default())
    }

    pub fn with_fees(fees: FeeSchedule) -> Self {
        Self::with_settings(ExchangeSettings {
            fees,
            ..ExchangeSettings::default()
        })
    }

    pub fn build(
        store: Arc<dyn TradingStore>,
        settings: ExchangeSettings,
        simulation: SimulationConfig,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(wednesday(10, 0)));
        let exchange = Arc::new(Exchange::new(store, clock.clone(), settings));
        let simulator = Arc::new(Simulator::new(exchange.clone(), simulation));
        TestVenue {
            exchange,
            simulator,
            clock,
        }
    }

    pub fn list(&self, ticker: &str, price: Decimal, volume: i64) -> Instrument {
        self.exchange
            .create_instrument(NewInstrument {
                ticker: ticker.into(),
                name: format!("{ticker} Holdings"),
                price,
                volume,
            })
            .unwrap()
    }

    pub fn account(&self, user: &str, cash: Decimal) -> Account {
        self.exchange.open_account(user, cash).unwrap()
    }

    pub fn bank(&self, account_id: i64) -> BankLink {
        self.exchange
            .link_bank(account_id, "First Savings", "021000021", "000123456789")
            .unwrap()
    }

    pub fn cash(&self, account_id: i64) -> Decimal {
        self.exchange.account(account_id).unwrap().cash
    }

    pub fn volume(&self, ticker: &str) -> i64 {
        self.exchange.instrument(ticker).unwrap().volume
    }
}

/// Store wrapper that fails instrument updates for chosen tickers.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub failing: HashSet<String>,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
        }
    }

    pub fn failing_on(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }
}

impl TradingStore for FlakyStore {
    fn open_account(
        &self,
        user_id: &str,
        opening_cash: Decimal,
        now: NaiveDateTime,
    ) -> Result<Account, TradesimError> {
        self.inner.open_account(user_id, opening_cash, now)
    }

    fn account(&self, account_id: i64) -> Result<Account, TradesimError> {
        self.inner.account(account_id)
    }

    fn account_by_user(&self, user_id: &str) -> Result<Option<Account>, TradesimError> {
        self.inner.account_by_user(user_id)
    }

    fn link_bank(&self, account_id: i64, link: &NewBankLink) -> Result<BankLink, TradesimError> {
        self.inner.link_bank(account_id, link)
    }

    fn bank_links(&self, account_id: i64) -> Result<Vec<BankLink>, TradesimError> {
        self.inner.bank_links(account_id)
    }

    fn create_instrument(&self, instrument: &Instrument) -> Result<(), TradesimError> {
        self.inner.create_instrument(instrument)
    }

    fn instrument(&self, ticker: &str) -> Result<Instrument, TradesimError> {
        self.inner.instrument(ticker)
    }

    fn list_instruments(&self, page: Page) -> Result<Vec<Instrument>, TradesimError> {
        self.inner.list_instruments(page)
    }

    fn tickers(&self) -> Result<Vec<String>, TradesimError> {
        self.inner.tickers()
    }

    fn update_instrument(
        &self,
        ticker: &str,
        update: InstrumentUpdate<'_>,
    ) -> Result<Instrument, TradesimError> {
        if self.failing.contains(ticker) {
            return Err(TradesimError::Database {
                reason: format!("injected failure for {ticker}"),
            });
        }
        self.inner.update_instrument(ticker, update)
    }

    fn execute_order(
        &self,
        request: &OrderRequest,
        fees: &FeeSchedule,
        now: NaiveDateTime,
    ) -> Result<Execution, TradesimError> {
        self.inner.execute_order(request, fees, now)
    }

    fn transfer_funds(
        &self,
        request: &TransferRequest,
        now: NaiveDateTime,
    ) -> Result<Transaction, TradesimError> {
        self.inner.transfer_funds(request, now)
    }

    fn pay_dividend(
        &self,
        ticker: &str,
        per_share: Decimal,
        now: NaiveDateTime,
    ) -> Result<Vec<Transaction>, TradesimError> {
        self.inner.pay_dividend(ticker, per_share, now)
    }

    fn position(&self, account_id: i64, ticker: &str) -> Result<Option<Position>, TradesimError> {
        self.inner.position(account_id, ticker)
    }

    fn positions(&self, account_id: i64) -> Result<Vec<(Position, Instrument)>, TradesimError> {
        self.inner.positions(account_id)
    }

    fn orders(&self, account_id: i64, page: Page) -> Result<Vec<Order>, TradesimError> {
        self.inner.orders(account_id, page)
    }

    fn transactions(&self, account_id: i64, page: Page) -> Result<Vec<Transaction>, TradesimError> {
        self.inner.transactions(account_id, page)
    }

    fn calendar_settings(&self) -> Result<CalendarSettings, TradesimError> {
        self.inner.calendar_settings()
    }

    fn set_market_hours(&self, hours: &MarketHours) -> Result<(), TradesimError> {
        self.inner.set_market_hours(hours)
    }

    fn set_market_schedule(&self, schedule: &MarketSchedule) -> Result<(), TradesimError> {
        self.inner.set_market_schedule(schedule)
    }

    fn add_holiday(&self, holiday: &MarketHoliday) -> Result<(), TradesimError> {
        self.inner.add_holiday(holiday)
    }

    fn remove_holiday(&self, date: NaiveDate) -> Result<bool, TradesimError> {
        self.inner.remove_holiday(date)
    }
}
