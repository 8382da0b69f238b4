//! Market order execution.
//!
//! [`plan_order`] is pure: it takes the rows an order touches, applies the
//! buy or sell rules, and returns their new state plus the ledger entries to
//! append. The store persists a plan inside one transaction, so either every
//! row changes or none does.

use rust_decimal::Decimal;

use super::account::Account;
use super::error::TradesimError;
use super::instrument::{check_quantity, normalize_ticker, round_price, Instrument};
use super::ledger::{LedgerEntry, Order, Side, Transaction, TransactionKind};
use super::position::{Position, PositionChange};

/// Commission charged per executed order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    pub commission_per_trade: Decimal,
    pub commission_pct: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            commission_per_trade: Decimal::ZERO,
            commission_pct: Decimal::ZERO,
        }
    }
}

impl FeeSchedule {
    pub fn is_free(&self) -> bool {
        self.commission_per_trade.is_zero() && self.commission_pct.is_zero()
    }
}

/// Calculate commission: flat_fee + (trade_value * pct / 100), to the cent.
/// `None` when the fee does not fit in a `Decimal`.
pub fn calculate_commission(trade_value: Decimal, fees: &FeeSchedule) -> Option<Decimal> {
    if fees.is_free() {
        return Some(Decimal::ZERO);
    }
    let pct = trade_value
        .checked_mul(fees.commission_pct)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    fees.commission_per_trade.checked_add(pct).map(round_price)
}

/// Price times quantity, or `None` on overflow.
fn trade_value(price: Decimal, quantity: i64) -> Option<Decimal> {
    price.checked_mul(Decimal::from(quantity))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub account_id: i64,
    pub ticker: String,
    pub quantity: i64,
    pub side: Side,
}

impl OrderRequest {
    pub fn new(account_id: i64, ticker: &str, quantity: i64, side: Side) -> Self {
        OrderRequest {
            account_id,
            ticker: ticker.to_string(),
            quantity,
            side,
        }
    }

    /// Check quantity and ticker shape; returns the request with a normalized ticker.
    pub fn validated(&self) -> Result<OrderRequest, TradesimError> {
        check_quantity(self.quantity)?;
        Ok(OrderRequest {
            ticker: normalize_ticker(&self.ticker)?,
            ..self.clone()
        })
    }
}

/// New state of every row an order touches.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    /// Cost of a buy or proceeds of a sell, before commission.
    pub gross: Decimal,
    pub commission: Decimal,
    pub account: Account,
    pub instrument: Instrument,
    pub position: PositionChange,
    /// First entry is the settlement; a fee entry follows when charged.
    pub entries: Vec<LedgerEntry>,
}

/// A committed order and the ledger rows it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub order: Order,
    pub settlement: Transaction,
    pub fee: Option<Transaction>,
    pub cash_after: Decimal,
    pub position_after: Option<Position>,
}

pub fn plan_order(
    account: Account,
    instrument: Instrument,
    position: Option<Position>,
    request: &OrderRequest,
    fees: &FeeSchedule,
) -> Result<Fill, TradesimError> {
    check_quantity(request.quantity)?;
    match request.side {
        Side::Buy => plan_buy(account, instrument, position, request.quantity, fees),
        Side::Sell => plan_sell(account, instrument, position, request.quantity, fees),
    }
}

fn plan_buy(
    mut account: Account,
    mut instrument: Instrument,
    position: Option<Position>,
    quantity: i64,
    fees: &FeeSchedule,
) -> Result<Fill, TradesimError> {
    let price = instrument.price;
    let available = account.cash;
    let unaffordable = move || TradesimError::InsufficientFunds {
        needed: Decimal::MAX,
        available,
    };
    let cost = trade_value(price, quantity).ok_or_else(unaffordable)?;
    let commission = calculate_commission(cost, fees).ok_or_else(unaffordable)?;
    let total = cost.checked_add(commission).ok_or_else(unaffordable)?;

    account.debit(total)?;
    instrument.reserve_volume(quantity)?;

    let position = match position {
        Some(mut existing) => {
            existing.add(quantity, cost)?;
            existing
        }
        None => Position::open(account.id, &instrument.ticker, quantity, price),
    };

    let mut entries = vec![LedgerEntry::new(TransactionKind::Withdrawal, cost)];
    if commission > Decimal::ZERO {
        entries.push(LedgerEntry::new(TransactionKind::Fee, commission));
    }

    Ok(Fill {
        side: Side::Buy,
        quantity,
        price,
        gross: cost,
        commission,
        account,
        instrument,
        position: PositionChange::Upsert(position),
        entries,
    })
}

fn plan_sell(
    mut account: Account,
    mut instrument: Instrument,
    position: Option<Position>,
    quantity: i64,
    fees: &FeeSchedule,
) -> Result<Fill, TradesimError> {
    let position = position.ok_or_else(|| TradesimError::InsufficientPosition {
        ticker: instrument.ticker.clone(),
        requested: quantity,
        held: 0,
    })?;
    let position = position.reduce(quantity)?;

    let price = instrument.price;
    let overflow = || TradesimError::invalid_input(format!("sale of {quantity} shares overflows"));
    let proceeds = trade_value(price, quantity).ok_or_else(overflow)?;
    let commission = calculate_commission(proceeds, fees).ok_or_else(overflow)?;
    if commission > proceeds {
        return Err(TradesimError::InsufficientFunds {
            needed: commission,
            available: proceeds,
        });
    }

    instrument.release_volume(quantity)?;
    account.credit(proceeds - commission)?;

    let mut entries = vec![LedgerEntry::new(TransactionKind::Deposit, proceeds)];
    if commission > Decimal::ZERO {
        entries.push(LedgerEntry::new(TransactionKind::Fee, commission));
    }

    Ok(Fill {
        side: Side::Sell,
        quantity,
        price,
        gross: proceeds,
        commission,
        account,
        instrument,
        position,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::NewInstrument;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn account(cash: Decimal) -> Account {
        Account {
            id: 1,
            user_id: "alice".into(),
            cash,
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn instrument(price: Decimal, volume: i64) -> Instrument {
        NewInstrument {
            ticker: "ACME".into(),
            name: "Acme".into(),
            price,
            volume,
        }
        .into_instrument()
        .unwrap()
    }

    fn buy(quantity: i64) -> OrderRequest {
        OrderRequest::new(1, "ACME", quantity, Side::Buy)
    }

    fn sell(quantity: i64) -> OrderRequest {
        OrderRequest::new(1, "ACME", quantity, Side::Sell)
    }

    #[test]
    fn commission_flat_plus_pct() {
        let fees = FeeSchedule {
            commission_per_trade: dec!(10),
            commission_pct: dec!(0.1),
        };
        assert_eq!(calculate_commission(dec!(10000), &fees), Some(dec!(20)));
        assert_eq!(
            calculate_commission(dec!(10000), &FeeSchedule::default()),
            Some(dec!(0))
        );
        let steep = FeeSchedule {
            commission_per_trade: dec!(0),
            commission_pct: dec!(1000),
        };
        assert_eq!(calculate_commission(Decimal::MAX, &steep), None);
    }

    #[test]
    fn buy_opens_position_at_price() {
        let fill = plan_order(
            account(dec!(1000)),
            instrument(dec!(12.50), 100),
            None,
            &buy(10),
            &FeeSchedule::default(),
        )
        .unwrap();
        assert_eq!(fill.gross, dec!(125));
        assert_eq!(fill.account.cash, dec!(875));
        assert_eq!(fill.instrument.volume, 90);
        assert_eq!(
            fill.position,
            PositionChange::Upsert(Position::open(1, "ACME", 10, dec!(12.50)))
        );
        assert_eq!(
            fill.entries,
            vec![LedgerEntry::new(TransactionKind::Withdrawal, dec!(125))]
        );
    }

    #[test]
    fn buy_folds_into_existing_average() {
        let existing = Position::open(1, "ACME", 10, dec!(10));
        let fill = plan_order(
            account(dec!(1000)),
            instrument(dec!(20), 100),
            Some(existing),
            &buy(30),
            &FeeSchedule::default(),
        )
        .unwrap();
        match fill.position {
            PositionChange::Upsert(p) => {
                assert_eq!(p.quantity, 40);
                // (10 * 10 + 30 * 20) / 40 = 17.5
                assert_eq!(p.avg_price, dec!(17.5));
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[test]
    fn buy_checks_funds_before_volume() {
        let err = plan_order(
            account(dec!(10)),
            instrument(dec!(5), 1),
            None,
            &buy(3),
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TradesimError::InsufficientFunds { .. }));
    }

    #[test]
    fn buy_rejects_excess_volume() {
        let err = plan_order(
            account(dec!(1000)),
            instrument(dec!(5), 2),
            None,
            &buy(3),
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TradesimError::InsufficientVolume {
                requested: 3,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn buy_commission_must_be_covered() {
        let fees = FeeSchedule {
            commission_per_trade: dec!(1),
            commission_pct: Decimal::ZERO,
        };
        let err = plan_order(
            account(dec!(50)),
            instrument(dec!(10), 100),
            None,
            &buy(5),
            &fees,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TradesimError::InsufficientFunds { needed, .. } if needed == dec!(51)
        ));

        let fill = plan_order(
            account(dec!(51)),
            instrument(dec!(10), 100),
            None,
            &buy(5),
            &fees,
        )
        .unwrap();
        assert_eq!(fill.account.cash, Decimal::ZERO);
        assert_eq!(fill.entries.len(), 2);
        assert_eq!(fill.entries[1].kind, TransactionKind::Fee);
    }

    #[test]
    fn sell_credits_proceeds_and_keeps_average() {
        let existing = Position::open(1, "ACME", 10, dec!(8));
        let fill = plan_order(
            account(dec!(0)),
            instrument(dec!(11), 50),
            Some(existing),
            &sell(4),
            &FeeSchedule::default(),
        )
        .unwrap();
        assert_eq!(fill.account.cash, dec!(44));
        assert_eq!(fill.instrument.volume, 54);
        assert_eq!(
            fill.position,
            PositionChange::Upsert(Position::open(1, "ACME", 6, dec!(8)))
        );
        assert_eq!(
            fill.entries,
            vec![LedgerEntry::new(TransactionKind::Deposit, dec!(44))]
        );
    }

    #[test]
    fn sell_everything_deletes_position() {
        let existing = Position::open(1, "ACME", 10, dec!(8));
        let fill = plan_order(
            account(dec!(0)),
            instrument(dec!(11), 50),
            Some(existing),
            &sell(10),
            &FeeSchedule::default(),
        )
        .unwrap();
        assert_eq!(
            fill.position,
            PositionChange::Delete {
                account_id: 1,
                ticker: "ACME".into()
            }
        );
    }

    #[test]
    fn sell_without_position_fails() {
        let err = plan_order(
            account(dec!(0)),
            instrument(dec!(11), 50),
            None,
            &sell(1),
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TradesimError::InsufficientPosition { held: 0, .. }
        ));
    }

    #[test]
    fn sell_proceeds_must_cover_commission() {
        let fees = FeeSchedule {
            commission_per_trade: dec!(5),
            commission_pct: Decimal::ZERO,
        };
        // cash on hand does not pay the fee of a sale too small to cover it
        for cash in [dec!(0), dec!(100)] {
            let existing = Position::open(1, "ACME", 10, dec!(1));
            let err = plan_order(
                account(cash),
                instrument(dec!(1), 0),
                Some(existing),
                &sell(2),
                &fees,
            )
            .unwrap_err();
            assert!(matches!(
                err,
                TradesimError::InsufficientFunds { needed, available }
                    if needed == dec!(5) && available == dec!(2)
            ));
        }

        let fill = plan_order(
            account(dec!(100)),
            instrument(dec!(1), 0),
            Some(Position::open(1, "ACME", 10, dec!(1))),
            &sell(10),
            &fees,
        )
        .unwrap();
        assert_eq!(fill.account.cash, dec!(105));
        assert_eq!(
            fill.entries,
            vec![
                LedgerEntry::new(TransactionKind::Deposit, dec!(10)),
                LedgerEntry::new(TransactionKind::Fee, dec!(5)),
            ]
        );
    }

    #[test]
    fn huge_buy_is_unaffordable() {
        let err = plan_order(
            account(dec!(1000)),
            instrument(dec!(10000000000), 10),
            None,
            &buy(9_000_000_000_000_000_000),
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TradesimError::InsufficientFunds { available, .. } if available == dec!(1000)
        ));

        let fees = FeeSchedule {
            commission_per_trade: dec!(1),
            commission_pct: dec!(0.5),
        };
        let err = plan_order(
            account(dec!(1000)),
            instrument(dec!(10000000000), 10),
            None,
            &buy(i64::MAX),
            &fees,
        )
        .unwrap_err();
        assert!(matches!(err, TradesimError::InsufficientFunds { .. }));
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let err = plan_order(
            account(dec!(100)),
            instrument(dec!(1), 10),
            None,
            &buy(0),
            &FeeSchedule::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TradesimError::InvalidInput { .. }));
    }

    #[test]
    fn request_validation_normalizes_ticker() {
        let req = OrderRequest::new(1, "acme", 5, Side::Buy).validated().unwrap();
        assert_eq!(req.ticker, "ACME");
        assert!(OrderRequest::new(1, "acme", -5, Side::Buy).validated().is_err());
    }
}
