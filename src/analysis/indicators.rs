// src/analysis/indicators.rs
use crate::domain::errors::{AnalysisError, AnalysisResult};
use serde::Serialize;
use ta::indicators::ExponentialMovingAverage;
use ta::Next;

pub const NEUTRAL_RSI: f64 = 50.0;

/// Indicator output. `low_confidence` marks a sentinel or a value computed
/// from less data than the indicator needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub low_confidence: bool,
}

impl Reading {
    pub fn confident(value: f64) -> Self {
        Self {
            value,
            low_confidence: false,
        }
    }

    pub fn low(value: f64) -> Self {
        Self {
            value,
            low_confidence: true,
        }
    }

    fn flagged(value: f64, low_confidence: bool) -> Self {
        Self {
            value,
            low_confidence,
        }
    }
}

/// Relative Strength Index with Wilder smoothing.
///
/// Fewer than `period + 1` prices yields the neutral sentinel 50, flagged.
pub fn rsi(prices: &[f64], period: usize) -> Reading {
    if period == 0 || prices.len() < period + 1 {
        return Reading::low(NEUTRAL_RSI);
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);
    for pair in prices.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    // Seed with simple averages, then apply Wilder's smoothing
    let mut avg_gain = gains.iter().take(period).sum::<f64>() / period as f64;
    let mut avg_loss = losses.iter().take(period).sum::<f64>() / period as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss.abs() < f64::EPSILON {
        if avg_gain.abs() < f64::EPSILON {
            return Reading::confident(NEUTRAL_RSI);
        }
        return Reading::confident(100.0);
    }

    let rs = avg_gain / avg_loss;
    Reading::confident(100.0 - (100.0 / (1.0 + rs)))
}

/// Full EMA series seeded with the first price, multiplier 2/(period+1).
pub fn ema_series(prices: &[f64], period: usize) -> AnalysisResult<Vec<f64>> {
    let mut ema = ExponentialMovingAverage::new(period)
        .map_err(|e| AnalysisError::InvalidPeriod(format!("EMA({}): {:?}", period, e)))?;
    Ok(prices.iter().map(|&price| ema.next(price)).collect())
}

/// Latest EMA value. Flagged when fewer than `period` prices exist.
pub fn ema(prices: &[f64], period: usize) -> AnalysisResult<Reading> {
    let series = ema_series(prices, period)?;
    Ok(match series.last() {
        Some(&value) => Reading::flagged(value, prices.len() < period),
        None => Reading::low(0.0),
    })
}

/// MACD line: fast EMA minus slow EMA, no signal-line smoothing.
pub fn macd(prices: &[f64], fast_period: usize, slow_period: usize) -> AnalysisResult<Reading> {
    if fast_period >= slow_period {
        return Err(AnalysisError::InvalidPeriod(format!(
            "MACD fast period {} must be below slow period {}",
            fast_period, slow_period
        )));
    }
    let fast = ema(prices, fast_period)?;
    let slow = ema(prices, slow_period)?;
    if prices.is_empty() {
        return Ok(Reading::low(0.0));
    }
    Ok(Reading::flagged(
        fast.value - slow.value,
        fast.low_confidence || slow.low_confidence,
    ))
}

/// Average True Range with Wilder smoothing over aligned high/low/close.
///
/// Fewer than `period + 1` points yields a flagged zero.
pub fn atr(
    high_prices: &[f64],
    low_prices: &[f64],
    close_prices: &[f64],
    period: usize,
) -> AnalysisResult<Reading> {
    if high_prices.len() != low_prices.len() || low_prices.len() != close_prices.len() {
        return Err(AnalysisError::MisalignedSeries {
            high: high_prices.len(),
            low: low_prices.len(),
            close: close_prices.len(),
        });
    }
    if period == 0 {
        return Err(AnalysisError::InvalidPeriod("ATR period must be positive".to_string()));
    }
    if close_prices.len() < period + 1 {
        return Ok(Reading::low(0.0));
    }

    let true_ranges: Vec<f64> = (1..close_prices.len())
        .map(|i| {
            let tr1 = high_prices[i] - low_prices[i];
            let tr2 = (high_prices[i] - close_prices[i - 1]).abs();
            let tr3 = (low_prices[i] - close_prices[i - 1]).abs();
            tr1.max(tr2).max(tr3)
        })
        .collect();

    let mut value = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
    }

    Ok(Reading::confident(value))
}

/// Naive support and resistance: min and max over the last `lookback` prices.
pub fn support_resistance(prices: &[f64], lookback: usize) -> (Reading, Reading) {
    if prices.is_empty() || lookback == 0 {
        return (Reading::low(0.0), Reading::low(0.0));
    }
    let window = &prices[prices.len().saturating_sub(lookback)..];
    let support = window.iter().copied().fold(f64::INFINITY, f64::min);
    let resistance = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let short = prices.len() < lookback;
    (Reading::flagged(support, short), Reading::flagged(resistance, short))
}

/// Latest volume divided by the mean of the preceding `lookback` volumes.
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> Reading {
    let Some((&current, prior)) = volumes.split_last() else {
        return Reading::low(1.0);
    };
    if prior.is_empty() || lookback == 0 {
        return Reading::low(1.0);
    }
    let window = &prior[prior.len().saturating_sub(lookback)..];
    let average = window.iter().sum::<f64>() / window.len() as f64;
    if average <= 0.0 {
        return Reading::low(1.0);
    }
    Reading::flagged(current / average, prior.len() < lookback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_rsi_insufficient_data_is_neutral_sentinel() {
        let period = 14;
        for len in 0..=period {
            let prices: Vec<f64> = (0..len).map(|i| 100.0 + (i * 7 % 5) as f64).collect();
            let reading = rsi(&prices, period);
            assert_eq!(reading.value, NEUTRAL_RSI, "len {}", len);
            assert!(reading.low_confidence, "len {}", len);
        }
    }

    #[test]
    fn test_rsi_all_gains_and_all_losses() {
        let rising: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14), Reading::confident(100.0));

        let falling: Vec<f64> = (1..=20).map(|i| 20.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14), Reading::confident(0.0));
    }

    #[test]
    fn test_rsi_flat_series_is_neutral_but_confident() {
        let flat = vec![25000.0; 20];
        assert_eq!(rsi(&flat, 14), Reading::confident(NEUTRAL_RSI));
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // changes +1, -1, +1; seed gain 0.5 loss 0.5; smoothed 0.75 / 0.25
        let reading = rsi(&[1.0, 2.0, 1.0, 2.0], 2);
        assert!(!reading.low_confidence);
        assert_close(reading.value, 75.0);
    }

    #[test]
    fn test_ema_seeded_with_first_price() {
        let series = ema_series(&[10.0, 20.0, 30.0], 3).unwrap();
        assert_close(series[0], 10.0);
        assert_close(series[1], 15.0);
        assert_close(series[2], 22.5);

        let short = ema(&[10.0, 20.0], 3).unwrap();
        assert!(short.low_confidence);
        assert_close(short.value, 15.0);

        assert!(!ema(&[10.0, 20.0, 30.0], 3).unwrap().low_confidence);
        assert_eq!(ema(&[], 3).unwrap(), Reading::low(0.0));
        assert!(ema(&[1.0], 0).is_err());
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let reading = macd(&rising, 12, 26).unwrap();
        assert!(reading.value > 0.0);
        assert!(!reading.low_confidence);

        let falling: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        assert!(macd(&falling, 12, 26).unwrap().value < 0.0);

        assert!(macd(&rising[..20], 12, 26).unwrap().low_confidence);
        assert!(macd(&rising, 26, 12).is_err());
    }

    #[test]
    fn test_atr_wilder_average() {
        let close = [10.0, 11.0, 13.0, 12.0];
        // true ranges 1, 2, 1; seed (1 + 2) / 2 = 1.5; next (1.5 + 1) / 2 = 1.25
        let reading = atr(&close, &close, &close, 2).unwrap();
        assert!(!reading.low_confidence);
        assert_close(reading.value, 1.25);
    }

    #[test]
    fn test_atr_uses_high_low_range() {
        let high = [11.0, 12.0];
        let low = [9.0, 8.0];
        let close = [10.0, 10.0];
        assert_close(atr(&high, &low, &close, 1).unwrap().value, 4.0);
    }

    #[test]
    fn test_atr_insufficient_and_misaligned() {
        let close = [10.0, 11.0];
        assert_eq!(atr(&close, &close, &close, 14).unwrap(), Reading::low(0.0));
        assert!(matches!(
            atr(&close, &close[..1], &close, 1),
            Err(AnalysisError::MisalignedSeries { .. })
        ));
    }

    #[test]
    fn test_support_resistance_window() {
        let prices = [5.0, 1.0, 9.0, 4.0, 6.0, 3.0];
        let (support, resistance) = support_resistance(&prices, 3);
        assert_eq!(support, Reading::confident(3.0));
        assert_eq!(resistance, Reading::confident(6.0));

        let (support, resistance) = support_resistance(&prices, 10);
        assert!(support.low_confidence && resistance.low_confidence);
        assert_eq!(support.value, 1.0);
        assert_eq!(resistance.value, 9.0);
    }

    #[test]
    fn test_volume_ratio_excludes_current_tick() {
        let mut volumes = vec![1000.0; 19];
        volumes.push(2000.0);
        let reading = volume_ratio(&volumes, 19);
        assert!(!reading.low_confidence);
        assert_close(reading.value, 2.0);

        assert_eq!(volume_ratio(&[500.0], 20), Reading::low(1.0));
        assert_eq!(volume_ratio(&[0.0, 0.0, 10.0], 20), Reading::low(1.0));
        assert!(volume_ratio(&[100.0, 150.0], 20).low_confidence);
    }
}
