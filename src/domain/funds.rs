//! Cash movements that are not trades: bank transfers and dividends.

use rust_decimal::Decimal;

use super::account::{Account, BankLink};
use super::error::TradesimError;
use super::ledger::{LedgerEntry, TransactionKind};
use super::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Bank to account.
    Deposit,
    /// Account to bank.
    Withdraw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub account_id: i64,
    pub bank_link_id: i64,
    pub amount: Decimal,
    pub direction: TransferDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub account: Account,
    pub bank_link: BankLink,
    pub entry: LedgerEntry,
}

pub fn check_amount(amount: Decimal) -> Result<(), TradesimError> {
    if amount <= Decimal::ZERO {
        return Err(TradesimError::InvalidAmount { amount });
    }
    Ok(())
}

pub fn plan_transfer(
    mut account: Account,
    mut bank_link: BankLink,
    request: &TransferRequest,
) -> Result<TransferPlan, TradesimError> {
    check_amount(request.amount)?;
    if bank_link.account_id != account.id {
        return Err(TradesimError::UnknownBankLink {
            account_id: account.id,
            bank_link_id: bank_link.id,
        });
    }

    let kind = match request.direction {
        TransferDirection::Deposit => {
            bank_link.debit(request.amount)?;
            account.credit(request.amount)?;
            TransactionKind::Deposit
        }
        TransferDirection::Withdraw => {
            account.debit(request.amount)?;
            bank_link.credit(request.amount)?;
            TransactionKind::Withdrawal
        }
    };

    Ok(TransferPlan {
        account,
        bank_link,
        entry: LedgerEntry::new(kind, request.amount),
    })
}

/// One holder's share of a dividend.
#[derive(Debug, Clone, PartialEq)]
pub struct DividendPayment {
    pub account_id: i64,
    pub amount: Decimal,
}

pub fn plan_dividend(
    positions: &[Position],
    per_share: Decimal,
) -> Result<Vec<DividendPayment>, TradesimError> {
    check_amount(per_share)?;
    positions
        .iter()
        .filter(|p| p.quantity > 0)
        .map(|p| {
            let amount = per_share
                .checked_mul(Decimal::from(p.quantity))
                .ok_or_else(|| {
                    TradesimError::invalid_input(format!(
                        "dividend of {per_share} on {} shares overflows",
                        p.quantity
                    ))
                })?;
            Ok(DividendPayment {
                account_id: p.account_id,
                amount,
            })
        })
        .collect()
}
