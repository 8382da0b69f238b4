//! Mark-to-market view of an account's holdings.

use rust_decimal::Decimal;
use serde::Serialize;

use super::account::Account;
use super::instrument::Instrument;
use super::position::Position;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub ticker: String,
    pub name: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Holding {
    pub fn value(position: &Position, instrument: &Instrument) -> Self {
        Holding {
            ticker: position.ticker.clone(),
            name: instrument.name.clone(),
            quantity: position.quantity,
            avg_price: position.avg_price,
            price: instrument.price,
            market_value: position.market_value(instrument.price),
            unrealized_pnl: position.unrealized_pnl(instrument.price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioView {
    pub account_id: i64,
    pub user_id: String,
    pub cash: Decimal,
    pub holdings: Vec<Holding>,
}

impl PortfolioView {
    pub fn new(account: &Account, positions: &[(Position, Instrument)]) -> Self {
        let mut holdings: Vec<Holding> = positions
            .iter()
            .map(|(pos, inst)| Holding::value(pos, inst))
            .collect();
        holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        PortfolioView {
            account_id: account.id,
            user_id: account.user_id.clone(),
            cash: account.cash,
            holdings,
        }
    }

    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.ticker == ticker)
    }

    pub fn position_count(&self) -> usize {
        self.holdings.len()
    }

    pub fn positions_value(&self) -> Decimal {
        self.holdings.iter().map(|h| h.market_value).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.holdings.iter().map(|h| h.unrealized_pnl).sum()
    }

    pub fn total_equity(&self) -> Decimal {
        self.cash + self.positions_value()
    }
}
