//! Configuration loading and validation.
//!
//! Turns raw `[market]` and `[simulation]` values into typed settings,
//! rejecting anything out of range before the exchange starts.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::account::DEFAULT_BANK_FUNDS;
use crate::domain::calendar::{parse_time, NationalHolidays};
use crate::domain::error::TradesimError;
use crate::domain::exchange::ExchangeSettings;
use crate::domain::execution::FeeSchedule;
use crate::domain::simulation::{ChangeRange, SimulationConfig};
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradesimError {
    TradesimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn decimal_value(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: Decimal,
) -> Result<Decimal, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => Decimal::from_str(raw.trim())
            .map_err(|e| invalid(section, key, format!("'{raw}' is not a decimal: {e}"))),
    }
}

fn non_negative_decimal(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: Decimal,
) -> Result<Decimal, TradesimError> {
    let value = decimal_value(config, section, key, default)?;
    if value < Decimal::ZERO {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value)
}

fn interval_secs(
    config: &dyn ConfigPort,
    key: &str,
    default: Duration,
) -> Result<Duration, TradesimError> {
    let secs = config.get_int("simulation", key, default.as_secs() as i64);
    if secs <= 0 {
        return Err(invalid("simulation", key, format!("{key} must be positive")));
    }
    Ok(Duration::from_secs(secs as u64))
}

fn change_range(
    config: &dyn ConfigPort,
    name: &str,
    default: ChangeRange,
) -> Result<ChangeRange, TradesimError> {
    let min_key = format!("{name}_min");
    let max_key = format!("{name}_max");
    let range = ChangeRange::new(
        config.get_double("simulation", &min_key, default.min_pct),
        config.get_double("simulation", &max_key, default.max_pct),
    );
    if !range.is_valid() {
        return Err(invalid(
            "simulation",
            &min_key,
            format!(
                "{min_key} must be greater than -100 and not above {max_key} (got {} and {})",
                range.min_pct, range.max_pct
            ),
        ));
    }
    Ok(range)
}

pub fn load_exchange_settings(config: &dyn ConfigPort) -> Result<ExchangeSettings, TradesimError> {
    let default_bank_funds =
        non_negative_decimal(config, "market", "default_bank_funds", DEFAULT_BANK_FUNDS)?;
    let fees = FeeSchedule {
        commission_per_trade: non_negative_decimal(
            config,
            "market",
            "commission_per_trade",
            Decimal::ZERO,
        )?,
        commission_pct: non_negative_decimal(config, "market", "commission_pct", Decimal::ZERO)?,
    };
    let national_holidays = match config.get_string("market", "national_holidays") {
        None => NationalHolidays::default(),
        Some(raw) => NationalHolidays::parse(&raw)
            .map_err(|reason| invalid("market", "national_holidays", reason))?,
    };

    Ok(ExchangeSettings {
        national_holidays,
        fees,
        default_bank_funds,
    })
}

pub fn load_simulation_config(config: &dyn ConfigPort) -> Result<SimulationConfig, TradesimError> {
    let defaults = SimulationConfig::default();

    let daily_reset_time: NaiveTime = match config.get_string("simulation", "daily_reset_time") {
        None => defaults.daily_reset_time,
        Some(raw) => parse_time(&raw).map_err(|e| invalid("simulation", "daily_reset_time", e.to_string()))?,
    };

    Ok(SimulationConfig {
        trend_interval: interval_secs(config, "trend_interval_secs", defaults.trend_interval)?,
        price_interval: interval_secs(config, "price_interval_secs", defaults.price_interval)?,
        daily_reset_time,
        bullish: change_range(config, "bullish", defaults.bullish)?,
        bearish: change_range(config, "bearish", defaults.bearish)?,
        neutral: change_range(config, "neutral", defaults.neutral)?,
    })
}
