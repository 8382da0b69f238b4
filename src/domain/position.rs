//! Position tracking with weighted-average cost basis.
//!
//! Buys fold into the average; sells reduce quantity and leave the average
//! untouched. No lot-level data is kept.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::error::TradesimError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub account_id: i64,
    pub ticker: String,
    pub quantity: i64,
    pub avg_price: Decimal,
}

/// What a trade does to a position row.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Upsert(Position),
    Delete { account_id: i64, ticker: String },
}

impl Position {
    pub fn open(account_id: i64, ticker: &str, quantity: i64, price: Decimal) -> Self {
        Position {
            account_id,
            ticker: ticker.to_string(),
            quantity,
            avg_price: price,
        }
    }

    pub fn cost_basis(&self) -> Decimal {
        self.avg_price * Decimal::from(self.quantity)
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        price * Decimal::from(self.quantity)
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.avg_price) * Decimal::from(self.quantity)
    }

    /// Fold a buy of `quantity` costing `cost` in total into the average.
    pub fn add(&mut self, quantity: i64, cost: Decimal) -> Result<(), TradesimError> {
        let overflow = || {
            TradesimError::invalid_input(format!(
                "adding {quantity} shares overflows the {} position",
                self.ticker
            ))
        };
        let new_quantity = self.quantity.checked_add(quantity).ok_or_else(overflow)?;
        let total_cost = self
            .avg_price
            .checked_mul(Decimal::from(self.quantity))
            .and_then(|basis| basis.checked_add(cost))
            .ok_or_else(overflow)?;
        self.avg_price = total_cost / Decimal::from(new_quantity);
        self.quantity = new_quantity;
        Ok(())
    }

    /// Remove `quantity` shares. Returns the change to persist.
    pub fn reduce(mut self, quantity: i64) -> Result<PositionChange, TradesimError> {
        if quantity > self.quantity {
            return Err(TradesimError::InsufficientPosition {
                ticker: self.ticker,
                requested: quantity,
                held: self.quantity,
            });
        }
        self.quantity -= quantity;
        if self.quantity <= 0 {
            Ok(PositionChange::Delete {
                account_id: self.account_id,
                ticker: self.ticker,
            })
        } else {
            Ok(PositionChange::Upsert(self))
        }
    }
}
