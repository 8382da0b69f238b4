//! Tradable instruments: live price, daily range, volume and trend.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TradesimError;

pub const MAX_TICKER_LEN: usize = 5;

/// Prices are kept to the cent.
pub const PRICE_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trend {
    type Err = TradesimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullish" => Ok(Trend::Bullish),
            "bearish" => Ok(Trend::Bearish),
            "neutral" => Ok(Trend::Neutral),
            other => Err(TradesimError::invalid_input(format!("unknown trend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    pub ticker: String,
    pub name: String,
    pub price: Decimal,
    pub volume: i64,
    pub trend: Trend,
    pub day_high: Decimal,
    pub day_low: Decimal,
}

/// Admin request to list a new instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInstrument {
    pub ticker: String,
    pub name: String,
    pub price: Decimal,
    pub volume: i64,
}

impl NewInstrument {
    /// Validate the request and build the instrument it describes.
    pub fn into_instrument(self) -> Result<Instrument, TradesimError> {
        let ticker = normalize_ticker(&self.ticker)?;
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(TradesimError::invalid_input("instrument name is required"));
        }
        if self.price < Decimal::ZERO {
            return Err(TradesimError::invalid_input(format!(
                "price must be non-negative, got {}",
                self.price
            )));
        }
        if self.volume < 0 {
            return Err(TradesimError::invalid_input(format!(
                "volume must be non-negative, got {}",
                self.volume
            )));
        }
        if self.price.normalize().scale() > PRICE_SCALE {
            return Err(TradesimError::invalid_input(format!(
                "price must be in whole cents, got {}",
                self.price
            )));
        }
        let price = self.price;
        Ok(Instrument {
            ticker,
            name,
            price,
            volume: self.volume,
            trend: Trend::Neutral,
            day_high: price,
            day_low: price,
        })
    }
}

/// Uppercase and check a ticker: 1 to 5 ASCII letters or digits.
pub fn normalize_ticker(input: &str) -> Result<String, TradesimError> {
    let ticker = input.trim().to_uppercase();
    if ticker.is_empty() || ticker.len() > MAX_TICKER_LEN {
        return Err(TradesimError::invalid_input(format!(
            "ticker must be 1-{MAX_TICKER_LEN} characters, got '{input}'"
        )));
    }
    if !ticker.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TradesimError::invalid_input(format!(
            "ticker must be alphanumeric, got '{input}'"
        )));
    }
    Ok(ticker)
}

pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

impl Instrument {
    /// Move the price by a fractional change (0.01 is +1%), floored at zero,
    /// and widen the daily range to include the new price.
    pub fn apply_price_delta(&mut self, change: Decimal) -> Decimal {
        let moved = round_price(self.price * (Decimal::ONE + change));
        let new_price = moved.max(Decimal::ZERO);
        self.price = new_price;
        self.day_high = self.day_high.max(new_price);
        self.day_low = self.day_low.min(new_price);
        new_price
    }

    /// Start a new trading day: both bounds collapse onto the current price.
    pub fn reset_daily_range(&mut self) {
        self.day_high = self.price;
        self.day_low = self.price;
    }

    pub fn reserve_volume(&mut self, quantity: i64) -> Result<(), TradesimError> {
        check_quantity(quantity)?;
        if quantity > self.volume {
            return Err(TradesimError::InsufficientVolume {
                ticker: self.ticker.clone(),
                requested: quantity,
                available: self.volume,
            });
        }
        self.volume -= quantity;
        Ok(())
    }

    pub fn release_volume(&mut self, quantity: i64) -> Result<(), TradesimError> {
        check_quantity(quantity)?;
        self.volume = self
            .volume
            .checked_add(quantity)
            .ok_or_else(|| TradesimError::invalid_input("volume overflow"))?;
        Ok(())
    }

    pub fn range_is_consistent(&self) -> bool {
        self.day_low <= self.price && self.price <= self.day_high
    }
}

pub fn check_quantity(quantity: i64) -> Result<(), TradesimError> {
    if quantity <= 0 {
        return Err(TradesimError::invalid_input(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}
