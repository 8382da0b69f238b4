//! Persistence port.
//!
//! Every method is one atomic unit: a multi-row change either commits in full
//! or leaves no trace.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::domain::account::{Account, BankLink, NewBankLink};
use crate::domain::calendar::{CalendarSettings, MarketHoliday, MarketHours, MarketSchedule};
use crate::domain::error::TradesimError;
use crate::domain::execution::{Execution, FeeSchedule, OrderRequest};
use crate::domain::funds::TransferRequest;
use crate::domain::instrument::Instrument;
use crate::domain::ledger::{Order, Page, Transaction};
use crate::domain::position::Position;

/// Mutation applied to one instrument inside its own critical section.
pub type InstrumentUpdate<'a> = &'a dyn Fn(&mut Instrument) -> Result<(), TradesimError>;

pub trait TradingStore: Send + Sync {
    fn open_account(
        &self,
        user_id: &str,
        opening_cash: Decimal,
        now: NaiveDateTime,
    ) -> Result<Account, TradesimError>;

    fn account(&self, account_id: i64) -> Result<Account, TradesimError>;

    fn account_by_user(&self, user_id: &str) -> Result<Option<Account>, TradesimError>;

    fn link_bank(&self, account_id: i64, link: &NewBankLink) -> Result<BankLink, TradesimError>;

    fn bank_links(&self, account_id: i64) -> Result<Vec<BankLink>, TradesimError>;

    /// Insert a validated instrument; `DuplicateTicker` if the ticker exists.
    fn create_instrument(&self, instrument: &Instrument) -> Result<(), TradesimError>;

    fn instrument(&self, ticker: &str) -> Result<Instrument, TradesimError>;

    /// Instruments ordered by ticker.
    fn list_instruments(&self, page: Page) -> Result<Vec<Instrument>, TradesimError>;

    fn tickers(&self) -> Result<Vec<String>, TradesimError>;

    /// Read, mutate and write back one instrument row atomically.
    fn update_instrument(
        &self,
        ticker: &str,
        update: InstrumentUpdate<'_>,
    ) -> Result<Instrument, TradesimError>;

    fn execute_order(
        &self,
        request: &OrderRequest,
        fees: &FeeSchedule,
        now: NaiveDateTime,
    ) -> Result<Execution, TradesimError>;

    fn transfer_funds(
        &self,
        request: &TransferRequest,
        now: NaiveDateTime,
    ) -> Result<Transaction, TradesimError>;

    /// Credit every holder of `ticker`; returns one DIVIDEND entry per holder.
    fn pay_dividend(
        &self,
        ticker: &str,
        per_share: Decimal,
        now: NaiveDateTime,
    ) -> Result<Vec<Transaction>, TradesimError>;

    fn position(&self, account_id: i64, ticker: &str) -> Result<Option<Position>, TradesimError>;

    /// Positions of an account paired with their instruments' current rows.
    fn positions(&self, account_id: i64) -> Result<Vec<(Position, Instrument)>, TradesimError>;

    /// Newest first.
    fn orders(&self, account_id: i64, page: Page) -> Result<Vec<Order>, TradesimError>;

    /// Newest first.
    fn transactions(&self, account_id: i64, page: Page) -> Result<Vec<Transaction>, TradesimError>;

    fn calendar_settings(&self) -> Result<CalendarSettings, TradesimError>;

    fn set_market_hours(&self, hours: &MarketHours) -> Result<(), TradesimError>;

    fn set_market_schedule(&self, schedule: &MarketSchedule) -> Result<(), TradesimError>;

    /// Adding a date twice replaces its label.
    fn add_holiday(&self, holiday: &MarketHoliday) -> Result<(), TradesimError>;

    /// Returns whether a holiday existed on `date`.
    fn remove_holiday(&self, date: NaiveDate) -> Result<bool, TradesimError>;
}
