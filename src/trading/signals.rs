// src/trading/signals.rs
use crate::analysis::{Bias, IndicatorEngine, IndicatorSnapshot};
use crate::config::{Config, SignalConfig};
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{Direction, Session, Signal};
use crate::market_data::MarketDataFeed;
use crate::trading::confidence::{ConfidenceResult, ConfidenceScorer, ScoreInput};
use crate::trading::session::SessionPolicy;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Per-symbol lifecycle of the most recent evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalState {
    NoSignal,
    Pending,
    Emitted,
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SuppressionReason {
    BelowThreshold,
    NoConsensus,
    MarketClosed,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SuppressionReason::BelowThreshold => write!(f, "confidence below threshold"),
            SuppressionReason::NoConsensus => write!(f, "no directional consensus"),
            SuppressionReason::MarketClosed => write!(f, "market closed"),
        }
    }
}

/// Record of an evaluation that did not reach consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suppression {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub threshold: f64,
    pub reason: SuppressionReason,
    pub stale: bool,
    pub session: Session,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Emitted(Signal),
    Suppressed(Suppression),
}

impl Evaluation {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            Evaluation::Emitted(signal) => Some(signal),
            Evaluation::Suppressed(_) => None,
        }
    }
}

#[derive(Debug)]
struct SymbolState {
    state: SignalState,
    suppressions: VecDeque<Suppression>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            state: SignalState::NoSignal,
            suppressions: VecDeque::new(),
        }
    }
}

/// Turns feed snapshots into BUY/SELL calls or recorded suppressions.
pub struct SignalGenerator {
    engine: IndicatorEngine,
    scorer: ConfidenceScorer,
    sessions: SessionPolicy,
    config: SignalConfig,
    states: Mutex<HashMap<String, SymbolState>>,
}

impl SignalGenerator {
    pub fn new(
        engine: IndicatorEngine,
        scorer: ConfidenceScorer,
        sessions: SessionPolicy,
        config: SignalConfig,
    ) -> Self {
        Self {
            engine,
            scorer,
            sessions,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            IndicatorEngine::new(config.indicators.clone()),
            ConfidenceScorer::new(config.scoring.clone()),
            SessionPolicy::new(config.session.clone()),
            config.signal.clone(),
        )
    }

    pub fn state(&self, symbol: &str) -> SignalState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|s| s.state)
            .unwrap_or(SignalState::NoSignal)
    }

    /// Suppressed evaluations for a symbol, oldest first.
    pub fn suppressions(&self, symbol: &str) -> Vec<Suppression> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|s| s.suppressions.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn set_state(&self, symbol: &str, state: SignalState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(symbol.to_string())
            .or_insert_with(SymbolState::new)
            .state = state;
    }

    fn record_suppression(&self, suppression: Suppression) {
        log::debug!(
            "Suppressed {} {} at {:.1}% (threshold {:.1}%): {}",
            suppression.direction,
            suppression.symbol,
            suppression.confidence,
            suppression.threshold,
            suppression.reason
        );
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = states
            .entry(suppression.symbol.clone())
            .or_insert_with(SymbolState::new);
        entry.state = SignalState::Suppressed;
        if self.config.suppression_history > 0 {
            if entry.suppressions.len() == self.config.suppression_history {
                entry.suppressions.pop_front();
            }
            entry.suppressions.push_back(suppression);
        }
    }

    /// Evaluate one symbol at `now`.
    pub fn evaluate(
        &self,
        feed: &MarketDataFeed,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> TradingResult<Evaluation> {
        let series = feed.snapshot(symbol, now)?;
        let latest = series
            .latest()
            .cloned()
            .ok_or_else(|| TradingError::Signal(format!("No ticks for {}", symbol)))?;

        self.set_state(symbol, SignalState::Pending);

        let snapshot = match self.engine.snapshot(&series) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.set_state(symbol, SignalState::NoSignal);
                return Err(e.into());
            }
        };
        let session = self.sessions.assess(now);
        let confidence = self.scorer.score(&ScoreInput {
            snapshot: &snapshot,
            volume_ratio: self.engine.volume_ratio(&series),
            session,
            stale: series.stale,
        });
        let direction = self.direction(&snapshot);
        let threshold = session.threshold(self.config.min_confidence);

        let reason = if session.session == Session::Closed {
            Some(SuppressionReason::MarketClosed)
        } else if direction == Direction::Hold {
            Some(SuppressionReason::NoConsensus)
        } else if confidence.score < threshold {
            Some(SuppressionReason::BelowThreshold)
        } else {
            None
        };

        if let Some(reason) = reason {
            let suppression = Suppression {
                symbol: symbol.to_string(),
                direction,
                confidence: confidence.score,
                threshold,
                reason,
                stale: confidence.stale,
                session: session.session,
                timestamp: now,
            };
            self.record_suppression(suppression.clone());
            return Ok(Evaluation::Suppressed(suppression));
        }

        let signal = self.build_signal(
            symbol,
            direction,
            latest.price,
            &snapshot,
            &confidence,
            session.session,
            now,
        );
        self.set_state(symbol, SignalState::Emitted);
        log::info!("Emitting signal: {}", signal);
        Ok(Evaluation::Emitted(signal))
    }

    /// Majority vote of trend, RSI bias and MACD sign; two of three must agree.
    fn direction(&self, snapshot: &IndicatorSnapshot) -> Direction {
        let scoring = self.scorer.config();
        let votes = [
            snapshot.trend_bias(scoring.trend_tolerance),
            snapshot.rsi_bias(scoring.rsi_bias_margin),
            snapshot.macd_bias(),
        ];
        let bullish = votes.iter().filter(|&&b| b == Bias::Bullish).count();
        let bearish = votes.iter().filter(|&&b| b == Bias::Bearish).count();
        if bullish >= 2 {
            Direction::Buy
        } else if bearish >= 2 {
            Direction::Sell
        } else {
            Direction::Hold
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_signal(
        &self,
        symbol: &str,
        direction: Direction,
        entry: Decimal,
        snapshot: &IndicatorSnapshot,
        confidence: &ConfidenceResult,
        session: Session,
        now: DateTime<Utc>,
    ) -> Signal {
        let levels = self.levels(direction, entry, snapshot.atr.value);
        Signal {
            symbol: symbol.to_string(),
            direction,
            confidence: confidence.score,
            entry_price: entry,
            target1: levels.target1,
            target2: levels.target2,
            stop_loss: levels.stop_loss,
            session,
            timestamp: now,
            reasoning: format!(
                "RSI {:.1}, EMA {:.2}, MACD {:.2}, ATR {:.2}, S/R {:.2}/{:.2}; {}",
                snapshot.rsi.value,
                snapshot.ema.value,
                snapshot.macd.value,
                snapshot.atr.value,
                snapshot.support.value,
                snapshot.resistance.value,
                confidence.describe()
            ),
        }
    }

    /// ATR-multiple offsets rounded up to whole ticks, at least one tick each.
    fn levels(&self, direction: Direction, entry: Decimal, atr: f64) -> Levels {
        let tick = self.config.tick_size;
        let offset = |multiple: f64| -> Decimal {
            let raw = Decimal::from_f64(atr.max(0.0) * multiple).unwrap_or(Decimal::ZERO);
            let ticks = (raw / tick).round_dp_with_strategy(0, RoundingStrategy::AwayFromZero);
            (ticks * tick).max(tick)
        };

        let target1 = offset(self.config.target1_atr_multiple);
        let target2 = offset(self.config.target2_atr_multiple).max(target1 + tick);
        let stop = offset(self.config.stop_atr_multiple);

        match direction {
            Direction::Sell => Levels {
                target1: entry - target1,
                target2: entry - target2,
                stop_loss: entry + stop,
            },
            _ => Levels {
                target1: entry + target1,
                target2: entry + target2,
                stop_loss: entry - stop,
            },
        }
    }
}

struct Levels {
    target1: Decimal,
    target2: Decimal,
    stop_loss: Decimal,
}
