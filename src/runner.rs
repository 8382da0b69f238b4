//! Timer loops driving the simulation tasks.
//!
//! Trend reassignment and price ticks run on fixed intervals; the daily reset
//! sleeps until the configured wall-clock time. Store work runs on the
//! blocking pool. Every loop exits when the shutdown channel flips to `true`.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::simulation::{Simulator, TaskOutcome};
use crate::domain::error::TradesimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimTask {
    AssignTrends,
    PriceTick,
    DailyReset,
}

impl SimTask {
    pub fn name(&self) -> &'static str {
        match self {
            SimTask::AssignTrends => "assign_trends",
            SimTask::PriceTick => "price_tick",
            SimTask::DailyReset => "daily_reset",
        }
    }

    fn run(&self, simulator: &Simulator) -> Result<TaskOutcome, TradesimError> {
        match self {
            SimTask::AssignTrends => simulator.assign_trends(),
            SimTask::PriceTick => simulator.price_tick(),
            SimTask::DailyReset => simulator.daily_reset(),
        }
    }
}

/// Time from `now` until the next occurrence of `at`; a full day when `now`
/// is exactly `at`.
pub fn until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

async fn run_task(task: SimTask, simulator: Arc<Simulator>) -> Option<TaskOutcome> {
    match tokio::task::spawn_blocking(move || task.run(&simulator)).await {
        Ok(Ok(outcome)) => {
            debug!(task = task.name(), %outcome, "task finished");
            Some(outcome)
        }
        Ok(Err(e)) => {
            warn!(task = task.name(), error = %e, "task failed, retrying on next tick");
            None
        }
        Err(e) => {
            error!(task = task.name(), error = %e, "task panicked");
            None
        }
    }
}

/// True once shutdown has been requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) -> bool {
    match shutdown.changed().await {
        Ok(()) => *shutdown.borrow(),
        Err(_) => true,
    }
}

async fn periodic(
    task: SimTask,
    simulator: Arc<Simulator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_task(task, simulator.clone()).await;
            }
            stop = shutdown_requested(&mut shutdown) => {
                if stop {
                    break;
                }
            }
        }
    }
    debug!(task = task.name(), "loop stopped");
}

async fn daily(simulator: Arc<Simulator>, mut shutdown: watch::Receiver<bool>) {
    let at = simulator.config().daily_reset_time;
    loop {
        let wait = until_next(simulator.exchange().now(), at);
        debug!(seconds = wait.as_secs(), "next daily reset scheduled");
        tokio::select! {
            _ = sleep(wait) => {
                run_task(SimTask::DailyReset, simulator.clone()).await;
            }
            stop = shutdown_requested(&mut shutdown) => {
                if stop {
                    break;
                }
            }
        }
    }
    debug!(task = SimTask::DailyReset.name(), "loop stopped");
}

/// Run all three task loops until `shutdown` carries `true`.
pub async fn run(simulator: Arc<Simulator>, shutdown: watch::Receiver<bool>) {
    let config = simulator.config().clone();
    info!(
        trend_secs = config.trend_interval.as_secs(),
        price_secs = config.price_interval.as_secs(),
        reset_at = %config.daily_reset_time,
        "simulation runner started"
    );

    let trends = tokio::spawn(periodic(
        SimTask::AssignTrends,
        simulator.clone(),
        config.trend_interval,
        shutdown.clone(),
    ));
    let ticks = tokio::spawn(periodic(
        SimTask::PriceTick,
        simulator.clone(),
        config.price_interval,
        shutdown.clone(),
    ));
    let reset = tokio::spawn(daily(simulator, shutdown));

    let (a, b, c) = tokio::join!(trends, ticks, reset);
    for joined in [a, b, c] {
        if let Err(e) = joined {
            error!(error = %e, "runner task ended abnormally");
        }
    }
    info!("simulation runner stopped");
}
