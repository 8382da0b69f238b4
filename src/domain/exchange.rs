//! Trading venue facade.
//!
//! [`Exchange`] validates requests, applies the market-hours gate and hands
//! each mutation to the store as one atomic call. It owns no state of its own
//! beyond configuration.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::account::{validate_user_id, Account, BankLink, NewBankLink, DEFAULT_BANK_FUNDS};
use super::calendar::{
    CalendarSettings, ClosureReason, MarketCalendar, MarketHoliday, MarketHours, MarketSchedule,
    NationalHolidays,
};
use super::error::TradesimError;
use super::execution::{Execution, FeeSchedule, OrderRequest};
use super::funds::{check_amount, TransferDirection, TransferRequest};
use super::instrument::{normalize_ticker, Instrument, NewInstrument, Trend};
use super::ledger::{Order, Page, Side, Transaction};
use super::portfolio::PortfolioView;
use crate::ports::clock_port::ClockPort;
use crate::ports::store_port::{InstrumentUpdate, TradingStore};

/// Venue-wide settings loaded from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSettings {
    pub national_holidays: NationalHolidays,
    pub fees: FeeSchedule,
    pub default_bank_funds: Decimal,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        ExchangeSettings {
            national_holidays: NationalHolidays::default(),
            fees: FeeSchedule::default(),
            default_bank_funds: DEFAULT_BANK_FUNDS,
        }
    }
}

pub struct Exchange {
    store: Arc<dyn TradingStore>,
    clock: Arc<dyn ClockPort>,
    settings: ExchangeSettings,
}

impl Exchange {
    pub fn new(
        store: Arc<dyn TradingStore>,
        clock: Arc<dyn ClockPort>,
        settings: ExchangeSettings,
    ) -> Self {
        Exchange {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ExchangeSettings {
        &self.settings
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    // --- market calendar ---

    pub fn market_calendar(&self) -> Result<MarketCalendar, TradesimError> {
        Ok(MarketCalendar::new(
            self.store.calendar_settings()?,
            self.settings.national_holidays.clone(),
        ))
    }

    pub fn closure_reason_at(
        &self,
        at: NaiveDateTime,
    ) -> Result<Option<ClosureReason>, TradesimError> {
        Ok(self.market_calendar()?.closure_reason(at))
    }

    pub fn is_market_open_at(&self, at: NaiveDateTime) -> Result<bool, TradesimError> {
        Ok(self.closure_reason_at(at)?.is_none())
    }

    pub fn is_market_open(&self) -> Result<bool, TradesimError> {
        self.is_market_open_at(self.now())
    }

    pub fn calendar_settings(&self) -> Result<CalendarSettings, TradesimError> {
        self.store.calendar_settings()
    }

    pub fn holidays(&self) -> Result<Vec<MarketHoliday>, TradesimError> {
        Ok(self.store.calendar_settings()?.holidays)
    }

    pub fn add_holiday(&self, date: NaiveDate, label: &str) -> Result<MarketHoliday, TradesimError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(TradesimError::invalid_input("holiday label is required"));
        }
        let holiday = MarketHoliday {
            date,
            label: label.to_string(),
        };
        self.store.add_holiday(&holiday)?;
        info!(%date, label, "market holiday added");
        Ok(holiday)
    }

    pub fn remove_holiday(&self, date: NaiveDate) -> Result<bool, TradesimError> {
        let removed = self.store.remove_holiday(date)?;
        if removed {
            info!(%date, "market holiday removed");
        }
        Ok(removed)
    }

    pub fn set_market_hours(
        &self,
        open: NaiveTime,
        close: NaiveTime,
        is_active: bool,
    ) -> Result<MarketHours, TradesimError> {
        let hours = MarketHours {
            open,
            close,
            is_active,
        };
        self.store.set_market_hours(&hours)?;
        info!(%open, %close, is_active, "market hours updated");
        Ok(hours)
    }

    pub fn set_market_schedule(
        &self,
        start_day: Weekday,
        end_day: Weekday,
        is_holiday: bool,
        note: &str,
    ) -> Result<MarketSchedule, TradesimError> {
        let schedule = MarketSchedule {
            start_day,
            end_day,
            is_holiday,
            note: note.trim().to_string(),
        };
        self.store.set_market_schedule(&schedule)?;
        info!(%start_day, %end_day, is_holiday, "market schedule updated");
        Ok(schedule)
    }

    // --- instruments ---

    pub fn create_instrument(&self, request: NewInstrument) -> Result<Instrument, TradesimError> {
        let instrument = request.into_instrument()?;
        self.store.create_instrument(&instrument)?;
        info!(
            ticker = %instrument.ticker,
            price = %instrument.price,
            volume = instrument.volume,
            "instrument listed"
        );
        Ok(instrument)
    }

    pub fn instrument(&self, ticker: &str) -> Result<Instrument, TradesimError> {
        self.store.instrument(&normalize_ticker(ticker)?)
    }

    pub fn price(&self, ticker: &str) -> Result<Decimal, TradesimError> {
        Ok(self.instrument(ticker)?.price)
    }

    pub fn list_instruments(&self, page: Page) -> Result<Vec<Instrument>, TradesimError> {
        self.store.list_instruments(page)
    }

    pub fn tickers(&self) -> Result<Vec<String>, TradesimError> {
        self.store.tickers()
    }

    pub(crate) fn update_instrument(
        &self,
        ticker: &str,
        update: InstrumentUpdate<'_>,
    ) -> Result<Instrument, TradesimError> {
        self.store.update_instrument(&normalize_ticker(ticker)?, update)
    }

    pub fn reserve_volume(&self, ticker: &str, quantity: i64) -> Result<Instrument, TradesimError> {
        self.update_instrument(ticker, &|instrument| instrument.reserve_volume(quantity))
    }

    pub fn release_volume(&self, ticker: &str, quantity: i64) -> Result<Instrument, TradesimError> {
        self.update_instrument(ticker, &|instrument| instrument.release_volume(quantity))
    }

    /// Move a price by a fractional change (0.01 is +1%).
    pub fn apply_price_delta(
        &self,
        ticker: &str,
        change: Decimal,
    ) -> Result<Instrument, TradesimError> {
        self.update_instrument(ticker, &|instrument| {
            instrument.apply_price_delta(change);
            Ok(())
        })
    }

    pub fn set_trend(&self, ticker: &str, trend: Trend) -> Result<Instrument, TradesimError> {
        self.update_instrument(ticker, &|instrument| {
            instrument.trend = trend;
            Ok(())
        })
    }

    // --- trading ---

    pub fn execute_order(&self, request: &OrderRequest) -> Result<Execution, TradesimError> {
        let request = request.validated()?;
        let now = self.now();

        if let Some(reason) = self.closure_reason_at(now)? {
            warn!(
                account_id = request.account_id,
                ticker = %request.ticker,
                side = %request.side,
                %reason,
                "order rejected: market closed"
            );
            return Err(TradesimError::MarketClosed);
        }

        match self.store.execute_order(&request, &self.settings.fees, now) {
            Ok(execution) => {
                info!(
                    account_id = request.account_id,
                    ticker = %request.ticker,
                    side = %request.side,
                    quantity = request.quantity,
                    price = %execution.order.price,
                    order_id = execution.order.id,
                    "order executed"
                );
                Ok(execution)
            }
            Err(e) => {
                warn!(
                    account_id = request.account_id,
                    ticker = %request.ticker,
                    side = %request.side,
                    quantity = request.quantity,
                    error = %e,
                    "order rejected"
                );
                Err(e)
            }
        }
    }

    pub fn buy(&self, account_id: i64, ticker: &str, quantity: i64) -> Result<Execution, TradesimError> {
        self.execute_order(&OrderRequest::new(account_id, ticker, quantity, Side::Buy))
    }

    pub fn sell(&self, account_id: i64, ticker: &str, quantity: i64) -> Result<Execution, TradesimError> {
        self.execute_order(&OrderRequest::new(account_id, ticker, quantity, Side::Sell))
    }

    // --- accounts and funds ---

    pub fn open_account(
        &self,
        user_id: &str,
        opening_cash: Decimal,
    ) -> Result<Account, TradesimError> {
        let user_id = validate_user_id(user_id)?;
        if opening_cash < Decimal::ZERO {
            return Err(TradesimError::invalid_input(format!(
                "opening cash must be non-negative, got {opening_cash}"
            )));
        }
        let account = self.store.open_account(&user_id, opening_cash, self.now())?;
        info!(account_id = account.id, user_id = %account.user_id, "account opened");
        Ok(account)
    }

    pub fn account(&self, account_id: i64) -> Result<Account, TradesimError> {
        self.store.account(account_id)
    }

    pub fn account_by_user(&self, user_id: &str) -> Result<Option<Account>, TradesimError> {
        self.store.account_by_user(user_id.trim())
    }

    /// Link a bank account seeded with the configured default funds.
    pub fn link_bank(
        &self,
        account_id: i64,
        institution: &str,
        routing_number: &str,
        account_number: &str,
    ) -> Result<BankLink, TradesimError> {
        let link = NewBankLink {
            institution: institution.to_string(),
            routing_number: routing_number.to_string(),
            account_number: account_number.to_string(),
            funds: self.settings.default_bank_funds,
        };
        link.validate()?;
        let bank_link = self.store.link_bank(account_id, &link)?;
        info!(account_id, bank_link_id = bank_link.id, "bank linked");
        Ok(bank_link)
    }

    pub fn bank_links(&self, account_id: i64) -> Result<Vec<BankLink>, TradesimError> {
        self.store.account(account_id)?;
        self.store.bank_links(account_id)
    }

    pub fn deposit(
        &self,
        account_id: i64,
        bank_link_id: i64,
        amount: Decimal,
    ) -> Result<Transaction, TradesimError> {
        self.transfer(account_id, bank_link_id, amount, TransferDirection::Deposit)
    }

    pub fn withdraw(
        &self,
        account_id: i64,
        bank_link_id: i64,
        amount: Decimal,
    ) -> Result<Transaction, TradesimError> {
        self.transfer(account_id, bank_link_id, amount, TransferDirection::Withdraw)
    }

    fn transfer(
        &self,
        account_id: i64,
        bank_link_id: i64,
        amount: Decimal,
        direction: TransferDirection,
    ) -> Result<Transaction, TradesimError> {
        check_amount(amount)?;
        let request = TransferRequest {
            account_id,
            bank_link_id,
            amount,
            direction,
        };
        let transaction = self
            .store
            .transfer_funds(&request, self.now())
            .inspect_err(|e| {
                warn!(account_id, bank_link_id, %amount, error = %e, "transfer rejected")
            })?;
        info!(account_id, bank_link_id, %amount, kind = %transaction.kind, "funds transferred");
        Ok(transaction)
    }

    /// Credit every holder `per_share` for each share held.
    pub fn pay_dividend(
        &self,
        ticker: &str,
        per_share: Decimal,
    ) -> Result<Vec<Transaction>, TradesimError> {
        let ticker = normalize_ticker(ticker)?;
        check_amount(per_share)?;
        let payments = self.store.pay_dividend(&ticker, per_share, self.now())?;
        info!(ticker = %ticker, %per_share, holders = payments.len(), "dividend paid");
        Ok(payments)
    }

    // --- read views ---

    pub fn portfolio(&self, account_id: i64) -> Result<PortfolioView, TradesimError> {
        let account = self.store.account(account_id)?;
        let positions = self.store.positions(account_id)?;
        Ok(PortfolioView::new(&account, &positions))
    }

    pub fn transaction_history(
        &self,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Transaction>, TradesimError> {
        self.store.account(account_id)?;
        self.store.transactions(account_id, page)
    }

    pub fn order_history(&self, account_id: i64, page: Page) -> Result<Vec<Order>, TradesimError> {
        self.store.account(account_id)?;
        self.store.orders(account_id, page)
    }
}
