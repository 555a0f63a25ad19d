// src/domain/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{MarketDataError, MarketDataResult};

/// A single price/volume observation for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: &str, price: Decimal, volume: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            volume,
            timestamp,
        }
    }

    pub fn validate(&self) -> MarketDataResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(MarketDataError::InvalidTick("empty symbol".to_string()));
        }
        if self.price <= Decimal::ZERO {
            return Err(MarketDataError::InvalidTick(format!(
                "{}: price must be positive, got {}",
                self.symbol, self.price
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(MarketDataError::InvalidTick(format!(
                "{}: volume must not be negative, got {}",
                self.symbol, self.volume
            )));
        }
        Ok(())
    }

    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or_default()
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named window of the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Session {
    Opening,
    Morning,
    Afternoon,
    Closing,
    Closed,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Session::Opening => write!(f, "OPENING"),
            Session::Morning => write!(f, "MORNING"),
            Session::Afternoon => write!(f, "AFTERNOON"),
            Session::Closing => write!(f, "CLOSING"),
            Session::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Actionable call handed to external alerting. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: Decimal,
    pub target1: Decimal,
    pub target2: Decimal,
    pub stop_loss: Decimal,
    pub session: Session,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} (T1 {}, T2 {}, SL {}) confidence {:.1}% [{}]",
            self.direction,
            self.symbol,
            self.entry_price,
            self.target1,
            self.target2,
            self.stop_loss,
            self.confidence,
            self.session
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_validation() {
        let now = Utc::now();
        assert!(Tick::new("NIFTY", dec!(25000), dec!(1000), now).validate().is_ok());
        assert!(Tick::new("NIFTY", dec!(25000), dec!(0), now).validate().is_ok());
        assert!(Tick::new("", dec!(25000), dec!(1000), now).validate().is_err());
        assert!(Tick::new("NIFTY", dec!(0), dec!(1000), now).validate().is_err());
        assert!(Tick::new("NIFTY", dec!(25000), dec!(-1), now).validate().is_err());
    }

    #[test]
    fn test_direction_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"BUY\"");
        assert_eq!(Direction::Sell.to_string(), "SELL");
    }
}
