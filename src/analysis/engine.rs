// src/analysis/engine.rs
use crate::analysis::indicators::{self, Reading};
use crate::config::IndicatorConfig;
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::market_data::SeriesSnapshot;
use serde::Serialize;

/// Directional lean of a single indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// Indicator values for one symbol at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub rsi: Reading,
    pub ema: Reading,
    pub ema_previous: f64,
    pub macd: Reading,
    pub atr: Reading,
    pub support: Reading,
    pub resistance: Reading,
}

impl IndicatorSnapshot {
    /// Price above/below EMA by more than `tolerance` (fraction of price).
    pub fn trend_bias(&self, tolerance: f64) -> Bias {
        if self.ema.low_confidence || self.price <= 0.0 {
            return Bias::Neutral;
        }
        let separation = (self.price - self.ema.value) / self.price;
        if separation > tolerance {
            Bias::Bullish
        } else if separation < -tolerance {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }

    /// Direction the EMA itself is moving.
    pub fn ema_slope_bias(&self) -> Bias {
        if self.ema.low_confidence {
            return Bias::Neutral;
        }
        let slope = self.ema.value - self.ema_previous;
        if slope > 0.0 {
            Bias::Bullish
        } else if slope < 0.0 {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }

    pub fn rsi_bias(&self, margin: f64) -> Bias {
        if self.rsi.low_confidence {
            Bias::Neutral
        } else if self.rsi.value > indicators::NEUTRAL_RSI + margin {
            Bias::Bullish
        } else if self.rsi.value < indicators::NEUTRAL_RSI - margin {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }

    pub fn macd_bias(&self) -> Bias {
        if self.macd.low_confidence {
            Bias::Neutral
        } else if self.macd.value > 0.0 {
            Bias::Bullish
        } else if self.macd.value < 0.0 {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }

    /// ATR as a fraction of price.
    pub fn atr_ratio(&self) -> f64 {
        if self.price > 0.0 {
            self.atr.value / self.price
        } else {
            0.0
        }
    }
}

/// Stateless calculator turning a series snapshot into indicator readings.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn snapshot(&self, series: &SeriesSnapshot) -> AnalysisResult<IndicatorSnapshot> {
        let prices = series.close_prices();
        let Some(&price) = prices.last() else {
            return Err(AnalysisError::EmptySeries(series.symbol.clone()));
        };
        self.compute(&prices, price)
    }

    fn compute(&self, prices: &[f64], price: f64) -> AnalysisResult<IndicatorSnapshot> {
        let cfg = &self.config;

        let ema_series = indicators::ema_series(prices, cfg.ema_period)?;
        let ema_value = ema_series.last().copied().unwrap_or_default();
        let ema_previous = if ema_series.len() >= 2 {
            ema_series[ema_series.len() - 2]
        } else {
            ema_value
        };
        let ema = if prices.len() < cfg.ema_period {
            Reading::low(ema_value)
        } else {
            Reading::confident(ema_value)
        };

        // Ticks carry a single price, so the high/low/close triple collapses
        let atr = indicators::atr(prices, prices, prices, cfg.atr_period)?;
        let (support, resistance) = indicators::support_resistance(prices, cfg.sr_lookback);

        Ok(IndicatorSnapshot {
            price,
            rsi: indicators::rsi(prices, cfg.rsi_period),
            ema,
            ema_previous,
            macd: indicators::macd(prices, cfg.macd_fast, cfg.macd_slow)?,
            atr,
            support,
            resistance,
        })
    }

    pub fn volume_ratio(&self, series: &SeriesSnapshot) -> Reading {
        indicators::volume_ratio(&series.volumes(), self.config.volume_lookback)
    }
}
