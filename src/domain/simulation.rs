//! Market simulation tasks: trend reassignment, price ticks, daily reset.
//!
//! Each task sweeps every listed instrument and commits one instrument at a
//! time. A failing instrument aborts the rest of the sweep; the runner tries
//! again on the next tick.

use chrono::NaiveTime;
use rand::Rng;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::TradesimError;
use super::exchange::Exchange;
use super::instrument::Trend;

/// Uniform range of percentage changes, e.g. `-0.5..=1.5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeRange {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl ChangeRange {
    pub const fn new(min_pct: f64, max_pct: f64) -> Self {
        ChangeRange { min_pct, max_pct }
    }

    pub fn is_valid(&self) -> bool {
        self.min_pct.is_finite()
            && self.max_pct.is_finite()
            && self.min_pct <= self.max_pct
            && self.min_pct > -100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub trend_interval: Duration,
    pub price_interval: Duration,
    pub daily_reset_time: NaiveTime,
    pub bullish: ChangeRange,
    pub bearish: ChangeRange,
    pub neutral: ChangeRange,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            trend_interval: Duration::from_secs(1800),
            price_interval: Duration::from_secs(30),
            daily_reset_time: NaiveTime::MIN,
            bullish: ChangeRange::new(-0.5, 1.5),
            bearish: ChangeRange::new(-1.5, 0.5),
            neutral: ChangeRange::new(-1.0, 1.0),
        }
    }
}

impl SimulationConfig {
    pub fn range(&self, trend: Trend) -> ChangeRange {
        match trend {
            Trend::Bullish => self.bullish,
            Trend::Bearish => self.bearish,
            Trend::Neutral => self.neutral,
        }
    }
}

/// Draw a fractional price change (0.01 is +1%) from a percentage range.
pub fn sample_change<R: Rng + ?Sized>(range: &ChangeRange, rng: &mut R) -> Decimal {
    let pct = if range.min_pct < range.max_pct {
        rng.gen_range(range.min_pct..=range.max_pct)
    } else {
        range.min_pct
    };
    Decimal::from_f64_retain(pct)
        .map(|p| p.round_dp(4) / Decimal::ONE_HUNDRED)
        .unwrap_or(Decimal::ZERO)
}

/// Bullish or bearish with equal probability.
pub fn draw_trend<R: Rng + ?Sized>(rng: &mut R) -> Trend {
    if rng.gen_bool(0.5) {
        Trend::Bullish
    } else {
        Trend::Bearish
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { instruments: usize },
    SkippedMarketClosed,
    SkippedInFlight,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed { instruments } => {
                write!(f, "completed ({instruments} instruments)")
            }
            TaskOutcome::SkippedMarketClosed => write!(f, "skipped: market closed"),
            TaskOutcome::SkippedInFlight => write!(f, "skipped: previous run still in flight"),
        }
    }
}

/// Holds a task's in-flight flag until dropped.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Simulator {
    exchange: Arc<Exchange>,
    config: SimulationConfig,
    trends_running: AtomicBool,
    tick_running: AtomicBool,
    reset_running: AtomicBool,
}

impl Simulator {
    pub fn new(exchange: Arc<Exchange>, config: SimulationConfig) -> Self {
        Simulator {
            exchange,
            config,
            trends_running: AtomicBool::new(false),
            tick_running: AtomicBool::new(false),
            reset_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    pub fn assign_trends(&self) -> Result<TaskOutcome, TradesimError> {
        self.assign_trends_with(&mut rand::thread_rng())
    }

    pub fn assign_trends_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<TaskOutcome, TradesimError> {
        let Some(_guard) = RunGuard::acquire(&self.trends_running) else {
            debug!("trend assignment already running");
            return Ok(TaskOutcome::SkippedInFlight);
        };

        let tickers = self.exchange.tickers()?;
        for ticker in &tickers {
            let trend = draw_trend(rng);
            self.exchange
                .set_trend(ticker, trend)
                .inspect_err(|e| error!(ticker = %ticker, error = %e, "trend assignment aborted"))?;
        }

        info!(instruments = tickers.len(), "trends assigned");
        Ok(TaskOutcome::Completed {
            instruments: tickers.len(),
        })
    }

    pub fn price_tick(&self) -> Result<TaskOutcome, TradesimError> {
        self.price_tick_with(&mut rand::thread_rng())
    }

    /// Move every price by a change drawn from its trend's range. Does nothing
    /// while the market is closed.
    pub fn price_tick_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<TaskOutcome, TradesimError> {
        let Some(_guard) = RunGuard::acquire(&self.tick_running) else {
            debug!("price tick already running");
            return Ok(TaskOutcome::SkippedInFlight);
        };

        if !self.exchange.is_market_open()? {
            debug!("market closed, price tick skipped");
            return Ok(TaskOutcome::SkippedMarketClosed);
        }

        let rng = RefCell::new(rng);
        let tickers = self.exchange.tickers()?;
        for ticker in &tickers {
            self.exchange
                .update_instrument(ticker, &|instrument| {
                    let range = self.config.range(instrument.trend);
                    let change = sample_change(&range, &mut **rng.borrow_mut());
                    instrument.apply_price_delta(change);
                    Ok(())
                })
                .inspect_err(|e| error!(ticker = %ticker, error = %e, "price tick aborted"))?;
        }

        debug!(instruments = tickers.len(), "price tick applied");
        Ok(TaskOutcome::Completed {
            instruments: tickers.len(),
        })
    }

    /// Collapse every daily range onto the current price.
    pub fn daily_reset(&self) -> Result<TaskOutcome, TradesimError> {
        let Some(_guard) = RunGuard::acquire(&self.reset_running) else {
            debug!("daily reset already running");
            return Ok(TaskOutcome::SkippedInFlight);
        };

        let tickers = self.exchange.tickers()?;
        for ticker in &tickers {
            self.exchange
                .update_instrument(ticker, &|instrument| {
                    instrument.reset_daily_range();
                    Ok(())
                })
                .inspect_err(|e| error!(ticker = %ticker, error = %e, "daily reset aborted"))?;
        }

        info!(instruments = tickers.len(), "daily ranges reset");
        Ok(TaskOutcome::Completed {
            instruments: tickers.len(),
        })
    }
}
