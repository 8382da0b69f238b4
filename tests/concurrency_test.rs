//! Concurrent order execution against an on-disk SQLite database.

mod common;

use common::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tradesim::adapters::sqlite_adapter::SqliteStore;
use tradesim::domain::error::TradesimError;
use tradesim::domain::exchange::ExchangeSettings;
use rust_decimal::Decimal;
use tradesim::domain::ledger::{Page, Side};
use tradesim::domain::simulation::{SimulationConfig, TaskOutcome};

fn file_venue(dir: &tempfile::TempDir) -> TestVenue {
    let store = SqliteStore::open(dir.path().join("venue.db"), 8, Duration::from_secs(10)).unwrap();
    store.initialize_schema().unwrap();
    TestVenue::build(
        Arc::new(store),
        ExchangeSettings::default(),
        SimulationConfig::default(),
    )
}

#[test]
fn concurrent_buys_drain_volume_exactly() {
    const BUYERS: i64 = 8;
    const QTY: i64 = 5;

    let dir = tempfile::tempdir().unwrap();
    let venue = file_venue(&dir);
    venue.list("ACME", dec!(2.50), BUYERS * QTY);
    let accounts: Vec<i64> = (0..BUYERS)
        .map(|i| venue.account(&format!("user{i}"), dec!(100)).id)
        .collect();

    let handles: Vec<_> = accounts
        .iter()
        .map(|&id| {
            let exchange = venue.exchange.clone();
            thread::spawn(move || exchange.buy(id, "ACME", QTY))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(venue.volume("ACME"), 0);
    for id in &accounts {
        assert_eq!(venue.cash(*id), dec!(87.50));
    }
    let err = venue.exchange.buy(accounts[0], "ACME", 1).unwrap_err();
    assert!(matches!(err, TradesimError::InsufficientVolume { available: 0, .. }));
}

#[test]
fn oversubscribed_buys_never_go_negative() {
    const BUYERS: usize = 12;
    const VOLUME: i64 = 7;

    let dir = tempfile::tempdir().unwrap();
    let venue = file_venue(&dir);
    venue.list("SCARC", dec!(1), VOLUME);
    let accounts: Vec<i64> = (0..BUYERS)
        .map(|i| venue.account(&format!("user{i}"), dec!(10)).id)
        .collect();

    let handles: Vec<_> = accounts
        .iter()
        .map(|&id| {
            let exchange = venue.exchange.clone();
            thread::spawn(move || exchange.buy(id, "SCARC", 1))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let filled = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(filled, VOLUME as usize);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, TradesimError::InsufficientVolume { .. })));
    assert_eq!(venue.volume("SCARC"), 0);

    let orders: usize = accounts
        .iter()
        .map(|id| venue.exchange.order_history(*id, Page::default()).unwrap().len())
        .sum();
    assert_eq!(orders, VOLUME as usize);
}

#[test]
fn same_account_racing_sells_cannot_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let venue = file_venue(&dir);
    venue.list("ACME", dec!(10), 100);
    let acct = venue.account("alice", dec!(1000));
    venue.exchange.buy(acct.id, "ACME", 10).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let exchange = venue.exchange.clone();
            thread::spawn(move || exchange.sell(acct.id, "ACME", 3))
        })
        .collect();
    let filled = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(filled, 3);
    let view = venue.exchange.portfolio(acct.id).unwrap();
    assert_eq!(view.holding("ACME").unwrap().quantity, 1);
    assert_eq!(view.cash, dec!(990));
    assert_eq!(venue.volume("ACME"), 99);
}

#[test]
fn scheduler_sweeps_interleave_with_trading() {
    const TRADERS: usize = 6;
    const BUYS: i64 = 10;
    const SELLS: i64 = 4;
    const VOLUME: i64 = 1_000;
    const OPENING_CASH: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

    let dir = tempfile::tempdir().unwrap();
    let venue = file_venue(&dir);
    venue.list("ACME", dec!(10), VOLUME);
    let accounts: Vec<i64> = (0..TRADERS)
        .map(|i| venue.account(&format!("user{i}"), OPENING_CASH).id)
        .collect();

    let sweeps = {
        let simulator = venue.simulator.clone();
        thread::spawn(move || {
            for i in 0..40 {
                let outcome = if i % 10 == 9 {
                    simulator.daily_reset()
                } else {
                    simulator.price_tick()
                };
                assert_eq!(outcome.unwrap(), TaskOutcome::Completed { instruments: 1 });
            }
        })
    };
    let traders: Vec<_> = accounts
        .iter()
        .map(|&id| {
            let exchange = venue.exchange.clone();
            thread::spawn(move || {
                for _ in 0..BUYS {
                    exchange.buy(id, "ACME", 1).unwrap();
                }
                for _ in 0..SELLS {
                    exchange.sell(id, "ACME", 1).unwrap();
                }
            })
        })
        .collect();

    sweeps.join().unwrap();
    for handle in traders {
        handle.join().unwrap();
    }

    let net_bought = TRADERS as i64 * (BUYS - SELLS);
    assert_eq!(venue.volume("ACME"), VOLUME - net_bought);

    for id in &accounts {
        let orders = venue.exchange.order_history(*id, Page::new(0, 100)).unwrap();
        assert_eq!(orders.len() as i64, BUYS + SELLS);
        let spent: Decimal = orders
            .iter()
            .map(|o| match o.side {
                Side::Buy => o.total,
                Side::Sell => -o.total,
            })
            .sum();
        assert_eq!(venue.cash(*id), OPENING_CASH - spent);

        let view = venue.exchange.portfolio(*id).unwrap();
        assert_eq!(view.holding("ACME").unwrap().quantity, BUYS - SELLS);
    }

    let inst = venue.exchange.instrument("ACME").unwrap();
    assert!(inst.price >= Decimal::ZERO);
    assert!(inst.range_is_consistent());
}
