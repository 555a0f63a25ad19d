// src/trading/confidence.rs
use crate::analysis::{Bias, IndicatorSnapshot, Reading};
use crate::config::ScoringConfig;
use crate::trading::session::SessionAssessment;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Trend,
    RsiExtremity,
    Volume,
    VolatilityBand,
    Session,
    StalePenalty,
}

impl Factor {
    pub fn name(&self) -> &'static str {
        match self {
            Factor::Trend => "trend",
            Factor::RsiExtremity => "rsi_extremity",
            Factor::Volume => "volume",
            Factor::VolatilityBand => "volatility_band",
            Factor::Session => "session",
            Factor::StalePenalty => "stale_penalty",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the score depends on.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub snapshot: &'a IndicatorSnapshot,
    pub volume_ratio: Reading,
    pub session: SessionAssessment,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceResult {
    /// Always within [0, 100]
    pub score: f64,
    pub factors: BTreeMap<Factor, f64>,
    pub stale: bool,
}

impl ConfidenceResult {
    pub fn contribution(&self, factor: Factor) -> f64 {
        self.factors.get(&factor).copied().unwrap_or_default()
    }

    /// "trend +25.0, rsi_extremity +25.0, ..." for logs and signal reasoning.
    pub fn describe(&self) -> String {
        self.factors
            .iter()
            .map(|(factor, points)| format!("{} {:+.1}", factor, points))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Deterministic weighted sum of indicator factors.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, input: &ScoreInput<'_>) -> ConfidenceResult {
        let mut factors = BTreeMap::new();
        factors.insert(Factor::Trend, self.trend_points(input.snapshot));
        factors.insert(Factor::RsiExtremity, self.rsi_points(input.snapshot));
        factors.insert(Factor::Volume, self.volume_points(input.volume_ratio));
        factors.insert(Factor::VolatilityBand, self.volatility_points(input.snapshot));
        factors.insert(Factor::Session, self.session_points(&input.session));

        let mut total: f64 = factors.values().sum();
        if input.stale && total > self.config.stale_confidence_cap {
            let penalty = self.config.stale_confidence_cap - total;
            factors.insert(Factor::StalePenalty, penalty);
            total += penalty;
        }

        ConfidenceResult {
            score: total.clamp(0.0, 100.0),
            factors,
            stale: input.stale,
        }
    }

    fn trend_points(&self, snapshot: &IndicatorSnapshot) -> f64 {
        let weight = self.config.weights.trend;
        match snapshot.trend_bias(self.config.trend_tolerance) {
            Bias::Neutral => 0.0,
            side if side == snapshot.ema_slope_bias() => weight,
            _ => weight / 2.0,
        }
    }

    fn rsi_points(&self, snapshot: &IndicatorSnapshot) -> f64 {
        if snapshot.rsi.low_confidence {
            return 0.0;
        }
        let distance = (snapshot.rsi.value - crate::analysis::indicators::NEUTRAL_RSI).abs();
        self.config.weights.rsi * (distance / self.config.rsi_extreme_span).min(1.0)
    }

    fn volume_points(&self, ratio: Reading) -> f64 {
        if !ratio.low_confidence && ratio.value >= self.config.volume_ratio_threshold {
            self.config.weights.volume
        } else {
            0.0
        }
    }

    fn volatility_points(&self, snapshot: &IndicatorSnapshot) -> f64 {
        if snapshot.atr.low_confidence {
            return 0.0;
        }
        let ratio = snapshot.atr_ratio();
        if ratio >= self.config.atr_band_min && ratio <= self.config.atr_band_max {
            self.config.weights.volatility
        } else {
            0.0
        }
    }

    fn session_points(&self, session: &SessionAssessment) -> f64 {
        let cap = self.config.weights.session;
        session.bonus.clamp(-cap, cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::models::Session;

    fn snapshot(price: f64, ema: f64, ema_previous: f64, rsi: f64, atr: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            price,
            rsi: Reading::confident(rsi),
            ema: Reading::confident(ema),
            ema_previous,
            macd: Reading::confident(price - ema),
            atr: Reading::confident(atr),
            support: Reading::confident(price - 100.0),
            resistance: Reading::confident(price + 100.0),
        }
    }

    fn session(bonus: f64) -> SessionAssessment {
        SessionAssessment {
            session: Session::Morning,
            bonus,
            min_confidence: None,
        }
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(Config::default().scoring)
    }

    #[test]
    fn test_full_confirmation_scores_every_factor() {
        let snap = snapshot(25190.0, 25150.0, 25140.0, 100.0, 10.0);
        let result = scorer().score(&ScoreInput {
            snapshot: &snap,
            volume_ratio: Reading::confident(2.0),
            session: session(15.0),
            stale: false,
        });
        assert_eq!(result.contribution(Factor::Trend), 25.0);
        assert_eq!(result.contribution(Factor::RsiExtremity), 25.0);
        assert_eq!(result.contribution(Factor::Volume), 20.0);
        assert_eq!(result.contribution(Factor::VolatilityBand), 15.0);
        assert_eq!(result.contribution(Factor::Session), 15.0);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_trend_against_ema_slope_earns_half() {
        let snap = snapshot(25190.0, 25150.0, 25160.0, 50.0, 0.0);
        let result = scorer().score(&ScoreInput {
            snapshot: &snap,
            volume_ratio: Reading::confident(1.0),
            session: session(0.0),
            stale: false,
        });
        assert_eq!(result.contribution(Factor::Trend), 12.5);
        assert_eq!(result.score, 12.5);
    }

    #[test]
    fn test_rsi_points_scale_with_distance() {
        let snap = snapshot(25000.0, 25000.0, 25000.0, 60.0, 0.0);
        let result = scorer().score(&ScoreInput {
            snapshot: &snap,
            volume_ratio: Reading::confident(1.0),
            session: session(0.0),
            stale: false,
        });
        assert!((result.contribution(Factor::RsiExtremity) - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_inputs_contribute_nothing() {
        let mut snap = snapshot(25190.0, 25150.0, 25140.0, 90.0, 10.0);
        snap.rsi = Reading::low(50.0);
        snap.atr = Reading::low(0.0);
        snap.ema = Reading::low(25150.0);
        let result = scorer().score(&ScoreInput {
            snapshot: &snap,
            volume_ratio: Reading::low(1.0),
            session: session(0.0),
            stale: false,
        });
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_stale_feed_caps_confidence() {
        let snap = snapshot(25190.0, 25150.0, 25140.0, 100.0, 10.0);
        let config = Config::default();
        let result = scorer().score(&ScoreInput {
            snapshot: &snap,
            volume_ratio: Reading::confident(2.0),
            session: session(15.0),
            stale: true,
        });
        assert!(result.stale);
        assert_eq!(result.score, config.scoring.stale_confidence_cap);
        assert!(result.score < config.signal.min_confidence);
        assert!(result.contribution(Factor::StalePenalty) < 0.0);
    }

    #[test]
    fn test_score_is_bounded_and_deterministic() {
        let scorer = scorer();
        for step in 0..50 {
            let price = 25000.0 + step as f64 * 37.0;
            let rsi = (step * 13 % 101) as f64;
            let snap = snapshot(price, 25500.0, 25490.0 + step as f64, rsi, step as f64 * 7.5);
            let input = ScoreInput {
                snapshot: &snap,
                volume_ratio: Reading::confident(step as f64 / 10.0),
                session: session(if step % 2 == 0 { 15.0 } else { -15.0 }),
                stale: step % 7 == 0,
            };
            let first = scorer.score(&input);
            let second = scorer.score(&input);
            assert!((0.0..=100.0).contains(&first.score), "{}", first.score);
            assert_eq!(first, second);
        }
    }
}
