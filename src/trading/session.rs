// src/trading/session.rs
use crate::config::{SessionConfig, SessionRule};
use crate::domain::models::Session;
use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc, Weekday};

/// Session-dependent adjustments for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionAssessment {
    pub session: Session,
    pub bonus: f64,
    /// Threshold override for this session, if any
    pub min_confidence: Option<f64>,
}

impl SessionAssessment {
    /// The stricter of the base threshold and the session override.
    pub fn threshold(&self, base: f64) -> f64 {
        match self.min_confidence {
            Some(min) => min.max(base),
            None => base,
        }
    }
}

/// Maps wall-clock time to the exchange's trading sessions. Stateless.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    config: SessionConfig,
    offset: FixedOffset,
}

impl SessionPolicy {
    pub fn new(config: SessionConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self { config, offset }
    }

    pub fn classify(&self, now: DateTime<Utc>) -> Session {
        let local = now.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Session::Closed;
        }

        let time = local.time();
        let cfg = &self.config;
        if time < cfg.market_open || time >= cfg.market_close {
            Session::Closed
        } else if time < cfg.opening_end {
            Session::Opening
        } else if time < cfg.morning_end {
            Session::Morning
        } else if time < cfg.afternoon_end {
            Session::Afternoon
        } else {
            Session::Closing
        }
    }

    pub fn assess(&self, now: DateTime<Utc>) -> SessionAssessment {
        let session = self.classify(now);
        match self.rule(session) {
            Some(rule) => SessionAssessment {
                session,
                bonus: rule.bonus,
                min_confidence: rule.min_confidence,
            },
            None => SessionAssessment {
                session,
                bonus: 0.0,
                min_confidence: None,
            },
        }
    }

    fn rule(&self, session: Session) -> Option<&SessionRule> {
        match session {
            Session::Opening => Some(&self.config.opening),
            Session::Morning => Some(&self.config.morning),
            Session::Afternoon => Some(&self.config.afternoon),
            Session::Closing => Some(&self.config.closing),
            Session::Closed => None,
        }
    }
}
