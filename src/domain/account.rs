//! Cash accounts and the bank links that fund them.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::error::TradesimError;

/// Funds available on a newly linked bank account.
pub const DEFAULT_BANK_FUNDS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub cash: Decimal,
    pub created_at: NaiveDateTime,
}

impl Account {
    pub fn credit(&mut self, amount: Decimal) -> Result<(), TradesimError> {
        self.cash = self.cash.checked_add(amount).ok_or_else(|| {
            TradesimError::invalid_input(format!("crediting {amount} overflows the cash balance"))
        })?;
        Ok(())
    }

    /// Take `amount` out of cash; never lets the balance go negative.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), TradesimError> {
        if amount > self.cash {
            return Err(TradesimError::InsufficientFunds {
                needed: amount,
                available: self.cash,
            });
        }
        self.cash -= amount;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankLink {
    pub id: i64,
    pub account_id: i64,
    pub institution: String,
    pub routing_number: String,
    pub account_number: String,
    pub funds: Decimal,
}

impl BankLink {
    pub fn credit(&mut self, amount: Decimal) -> Result<(), TradesimError> {
        self.funds = self.funds.checked_add(amount).ok_or_else(|| {
            TradesimError::invalid_input(format!("crediting {amount} overflows the bank balance"))
        })?;
        Ok(())
    }

    pub fn debit(&mut self, amount: Decimal) -> Result<(), TradesimError> {
        if amount > self.funds {
            return Err(TradesimError::InsufficientBankFunds {
                needed: amount,
                available: self.funds,
            });
        }
        self.funds -= amount;
        Ok(())
    }

    /// Account number with all but the last four digits hidden.
    pub fn masked_account_number(&self) -> String {
        let chars: Vec<char> = self.account_number.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{}", "*".repeat(hidden), tail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBankLink {
    pub institution: String,
    pub routing_number: String,
    pub account_number: String,
    pub funds: Decimal,
}

impl NewBankLink {
    pub fn validate(&self) -> Result<(), TradesimError> {
        if self.institution.trim().is_empty() {
            return Err(TradesimError::invalid_input("institution name is required"));
        }
        for (field, value) in [
            ("routing number", &self.routing_number),
            ("account number", &self.account_number),
        ] {
            let value = value.trim();
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(TradesimError::invalid_input(format!(
                    "{field} must be digits, got '{value}'"
                )));
            }
        }
        if self.funds < Decimal::ZERO {
            return Err(TradesimError::invalid_input("bank funds must be non-negative"));
        }
        Ok(())
    }
}

pub fn validate_user_id(user_id: &str) -> Result<String, TradesimError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(TradesimError::invalid_input("user id is required"));
    }
    Ok(trimmed.to_string())
}
