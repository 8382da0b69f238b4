//! Runner loop tests on a real tokio runtime.

mod common;

use common::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tradesim::domain::exchange::ExchangeSettings;
use tradesim::domain::instrument::Trend;
use tradesim::domain::simulation::{ChangeRange, SimulationConfig};
use tradesim::runner;

fn fast_config() -> SimulationConfig {
    SimulationConfig {
        trend_interval: Duration::from_millis(20),
        price_interval: Duration::from_millis(10),
        bullish: ChangeRange::new(1.0, 1.0),
        bearish: ChangeRange::new(-1.0, -1.0),
        ..SimulationConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_ticks_until_shutdown() {
    let venue = TestVenue::build(
        Arc::new(memory_store()),
        ExchangeSettings::default(),
        fast_config(),
    );
    venue.list("ACME", dec!(100), 10);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(runner::run(venue.simulator.clone(), rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();

    let inst = venue.exchange.instrument("ACME").unwrap();
    assert_ne!(inst.trend, Trend::Neutral);
    assert_ne!(inst.price, dec!(100));
    assert!(inst.range_is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_leaves_prices_alone_when_closed() {
    let venue = TestVenue::build(
        Arc::new(memory_store()),
        ExchangeSettings::default(),
        fast_config(),
    );
    venue.list("ACME", dec!(100), 10);
    venue.clock.set(at(2024, 1, 13, 10, 0));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(runner::run(venue.simulator.clone(), rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();

    let inst = venue.exchange.instrument("ACME").unwrap();
    assert_eq!(inst.price, dec!(100));
    assert_ne!(inst.trend, Trend::Neutral);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_sender_stops_runner() {
    let venue = TestVenue::new();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(runner::run(venue.simulator.clone(), rx));
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
}
