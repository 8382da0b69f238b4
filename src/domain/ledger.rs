//! Immutable trade and cash-movement records.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TradesimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = TradesimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(TradesimError::invalid_input(format!("unknown side '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Fee,
    Dividend,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Fee => "FEE",
            TransactionKind::Dividend => "DIVIDEND",
        }
    }

    /// Whether money of this kind flows into the account.
    pub fn is_inflow(&self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::Dividend)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = TradesimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            "FEE" => Ok(TransactionKind::Fee),
            "DIVIDEND" => Ok(TransactionKind::Dividend),
            other => Err(TradesimError::invalid_input(format!(
                "unknown transaction kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: i64,
    pub account_id: i64,
    pub ticker: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub total: Decimal,
    pub executed: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    /// Signed: negative when money leaves the account.
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub order_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

/// A ledger entry before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub kind: TransactionKind,
    /// Unsigned magnitude; the sign comes from `kind`.
    pub magnitude: Decimal,
}

impl LedgerEntry {
    pub fn new(kind: TransactionKind, magnitude: Decimal) -> Self {
        LedgerEntry { kind, magnitude }
    }

    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_inflow() {
            self.magnitude
        } else {
            -self.magnitude
        }
    }
}

/// Offset/count window for list views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(offset: u32, limit: u32) -> Self {
        Page { offset, limit }
    }

    pub fn first(limit: u32) -> Self {
        Page { offset: 0, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::first(Page::DEFAULT_LIMIT)
    }
}
