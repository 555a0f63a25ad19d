// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use chrono::NaiveTime;
use dotenv::dotenv;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Signal pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Rolling history and staleness
    pub feed: FeedConfig,

    /// Indicator periods
    pub indicators: IndicatorConfig,

    /// Confidence weights and factor parameters
    pub scoring: ScoringConfig,

    /// Emission threshold and level placement
    pub signal: SignalConfig,

    /// Trading-day session windows
    pub session: SessionConfig,

    /// Periodic evaluation
    pub scheduler: SchedulerConfig,

    /// Outcome tracking of emitted calls
    pub tracking: TrackingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Ticks kept per symbol
    pub capacity: usize,

    /// Seconds without a tick before a symbol counts as stale
    pub staleness_secs: i64,

    /// First delay before retrying a failed tick source
    pub retry_initial_ms: u64,

    /// Upper bound for the doubling retry delay
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub ema_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub atr_period: usize,

    /// Window for support/resistance
    pub sr_lookback: usize,

    /// Prior ticks averaged for the volume ratio
    pub volume_lookback: usize,
}

/// Maximum points each factor may contribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub trend: f64,
    pub rsi: f64,
    pub volume: f64,
    pub volatility: f64,
    pub session: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,

    /// Distance from 50 at which RSI earns full points
    pub rsi_extreme_span: f64,

    /// Distance from 50 before RSI votes for a direction
    pub rsi_bias_margin: f64,

    /// Volume ratio at which volume is confirmed
    pub volume_ratio_threshold: f64,

    /// ATR as a fraction of price, lower bound of the target band
    pub atr_band_min: f64,

    /// ATR as a fraction of price, upper bound of the target band
    pub atr_band_max: f64,

    /// Minimum price/EMA separation, as a fraction of price, for a trend
    pub trend_tolerance: f64,

    /// Highest confidence a stale symbol can reach
    pub stale_confidence_cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Minimum confidence for emission (0-100)
    pub min_confidence: f64,

    pub target1_atr_multiple: f64,
    pub target2_atr_multiple: f64,
    pub stop_atr_multiple: f64,

    /// Exchange price increment; levels are rounded to it
    pub tick_size: Decimal,

    /// Suppressed evaluations remembered per symbol
    pub suppression_history: usize,
}

/// Bonus and threshold override applied during one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRule {
    pub bonus: f64,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,

    pub market_open: NaiveTime,
    pub opening_end: NaiveTime,
    pub morning_end: NaiveTime,
    pub afternoon_end: NaiveTime,
    pub market_close: NaiveTime,

    pub opening: SessionRule,
    pub morning: SessionRule,
    pub afternoon: SessionRule,
    pub closing: SessionRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Symbols evaluated periodically (e.g., ["NIFTY", "BANKNIFTY"])
    pub symbols: Vec<String>,

    /// Seconds between evaluations of one symbol
    pub eval_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Seconds an emitted call stays open before it is resolved as expired
    pub max_open_secs: i64,

    /// Resolved calls remembered per symbol
    pub record_history: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let mut config = match env::var("PIPELINE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(symbols) = env::var("PIPELINE_SYMBOLS") {
            config.scheduler.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(value) = env::var("MIN_CONFIDENCE") {
            config.signal.min_confidence = value.parse().map_err(|_| {
                AppError::Config(format!("MIN_CONFIDENCE is not a number: {}", value))
            })?;
        }
        if let Ok(value) = env::var("EVAL_INTERVAL_SECS") {
            config.scheduler.eval_interval_secs = value.parse().map_err(|_| {
                AppError::Config(format!("EVAL_INTERVAL_SECS is not an integer: {}", value))
            })?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        config.logging.to_file = env::var("LOG_TO_FILE")
            .unwrap_or_else(|_| config.logging.to_file.to_string())
            .parse()
            .unwrap_or(false);
        if let Ok(path) = env::var("LOG_FILE_PATH") {
            config.logging.file_path = Some(path);
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            AppError::Config(format!("Failed to open config file: {}", e))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            AppError::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents).map_err(|e| {
            AppError::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Reject configurations that could only fail mid-run.
    pub fn validate(&self) -> AppResult<()> {
        let capacity = self.feed.capacity;
        if capacity < 2 {
            return Err(invalid(format!("feed.capacity must be at least 2, got {}", capacity)));
        }
        if self.feed.staleness_secs <= 0 {
            return Err(invalid("feed.staleness_secs must be positive".to_string()));
        }
        if self.feed.retry_initial_ms == 0 || self.feed.retry_max_ms < self.feed.retry_initial_ms {
            return Err(invalid(
                "feed retry delays must satisfy 0 < retry_initial_ms <= retry_max_ms".to_string(),
            ));
        }

        let ind = &self.indicators;
        for (name, period) in [
            ("rsi_period", ind.rsi_period),
            ("ema_period", ind.ema_period),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("atr_period", ind.atr_period),
            ("sr_lookback", ind.sr_lookback),
            ("volume_lookback", ind.volume_lookback),
        ] {
            if period == 0 {
                return Err(invalid(format!("indicators.{} must be positive", name)));
            }
        }
        // RSI, ATR and the volume ratio need one point beyond their period
        for (name, period) in [
            ("rsi_period", ind.rsi_period),
            ("ema_period", ind.ema_period),
            ("macd_slow", ind.macd_slow),
            ("atr_period", ind.atr_period),
            ("sr_lookback", ind.sr_lookback),
            ("volume_lookback", ind.volume_lookback),
        ] {
            if period >= capacity {
                return Err(invalid(format!(
                    "indicators.{} ({}) must be below feed.capacity ({})",
                    name, period, capacity
                )));
            }
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(invalid(format!(
                "indicators.macd_fast ({}) must be below macd_slow ({})",
                ind.macd_fast, ind.macd_slow
            )));
        }

        let scoring = &self.scoring;
        let w = &scoring.weights;
        for (name, weight) in [
            ("trend", w.trend),
            ("rsi", w.rsi),
            ("volume", w.volume),
            ("volatility", w.volatility),
            ("session", w.session),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(format!("scoring.weights.{} must be non-negative", name)));
            }
        }
        for (name, value) in [
            ("rsi_extreme_span", scoring.rsi_extreme_span),
            ("rsi_bias_margin", scoring.rsi_bias_margin),
            ("volume_ratio_threshold", scoring.volume_ratio_threshold),
            ("atr_band_min", scoring.atr_band_min),
            ("atr_band_max", scoring.atr_band_max),
            ("trend_tolerance", scoring.trend_tolerance),
            ("stale_confidence_cap", scoring.stale_confidence_cap),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("scoring.{} must be a finite number", name)));
            }
        }
        if scoring.rsi_extreme_span <= 0.0 || scoring.rsi_extreme_span > 50.0 {
            return Err(invalid("scoring.rsi_extreme_span must be in (0, 50]".to_string()));
        }
        if scoring.rsi_bias_margin < 0.0 || scoring.rsi_bias_margin >= 50.0 {
            return Err(invalid("scoring.rsi_bias_margin must be in [0, 50)".to_string()));
        }
        if scoring.volume_ratio_threshold <= 0.0 {
            return Err(invalid("scoring.volume_ratio_threshold must be positive".to_string()));
        }
        if scoring.atr_band_min < 0.0 || scoring.atr_band_min >= scoring.atr_band_max {
            return Err(invalid(format!(
                "scoring ATR band [{}, {}] is empty",
                scoring.atr_band_min, scoring.atr_band_max
            )));
        }
        if scoring.trend_tolerance < 0.0 {
            return Err(invalid("scoring.trend_tolerance must not be negative".to_string()));
        }

        let signal = &self.signal;
        for (name, value) in [
            ("target1_atr_multiple", signal.target1_atr_multiple),
            ("target2_atr_multiple", signal.target2_atr_multiple),
            ("stop_atr_multiple", signal.stop_atr_multiple),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("signal.{} must be a finite number", name)));
            }
        }
        if !(signal.min_confidence > 0.0 && signal.min_confidence <= 100.0) {
            return Err(invalid(format!(
                "signal.min_confidence must be in (0, 100], got {}",
                signal.min_confidence
            )));
        }
        if scoring.stale_confidence_cap < 0.0
            || scoring.stale_confidence_cap >= signal.min_confidence
        {
            return Err(invalid(format!(
                "scoring.stale_confidence_cap ({}) must be below signal.min_confidence ({})",
                scoring.stale_confidence_cap, signal.min_confidence
            )));
        }
        if signal.target1_atr_multiple <= 0.0
            || signal.target2_atr_multiple <= signal.target1_atr_multiple
        {
            return Err(invalid(
                "signal ATR multiples must satisfy 0 < target1 < target2".to_string(),
            ));
        }
        if signal.stop_atr_multiple <= 0.0 {
            return Err(invalid("signal.stop_atr_multiple must be positive".to_string()));
        }
        if signal.tick_size <= Decimal::ZERO {
            return Err(invalid("signal.tick_size must be positive".to_string()));
        }

        let session = &self.session;
        if session.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid("session.utc_offset_minutes out of range".to_string()));
        }
        let bounds = [
            session.market_open,
            session.opening_end,
            session.morning_end,
            session.afternoon_end,
            session.market_close,
        ];
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid(
                "session boundaries must be strictly increasing from market_open to market_close"
                    .to_string(),
            ));
        }
        for (name, rule) in [
            ("opening", &session.opening),
            ("morning", &session.morning),
            ("afternoon", &session.afternoon),
            ("closing", &session.closing),
        ] {
            if !rule.bonus.is_finite() || rule.bonus.abs() > w.session {
                return Err(invalid(format!(
                    "session.{}.bonus ({}) exceeds the session weight ({})",
                    name, rule.bonus, w.session
                )));
            }
            if let Some(min) = rule.min_confidence {
                if !(min > 0.0 && min <= 100.0) {
                    return Err(invalid(format!(
                        "session.{}.min_confidence must be in (0, 100]",
                        name
                    )));
                }
            }
        }

        if self.scheduler.eval_interval_secs == 0 {
            return Err(invalid("scheduler.eval_interval_secs must be positive".to_string()));
        }
        if self.tracking.max_open_secs <= 0 {
            return Err(invalid("tracking.max_open_secs must be positive".to_string()));
        }

        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        // Set log level
        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        // Configure output
        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    AppError::Config(format!("Failed to create log file: {}", e))
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.try_init().map_err(|e| {
            AppError::Config(format!("Failed to initialize logger: {}", e))
        })?;

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(message)
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                capacity: 100,
                staleness_secs: 30,
                retry_initial_ms: 500,
                retry_max_ms: 30_000,
            },
            indicators: IndicatorConfig {
                rsi_period: 14,
                ema_period: 9,
                macd_fast: 12,
                macd_slow: 26,
                atr_period: 14,
                sr_lookback: 20,
                volume_lookback: 10,
            },
            scoring: ScoringConfig {
                weights: ScoringWeights {
                    trend: 25.0,
                    rsi: 25.0,
                    volume: 20.0,
                    volatility: 15.0,
                    session: 15.0,
                },
                rsi_extreme_span: 20.0,
                rsi_bias_margin: 5.0,
                volume_ratio_threshold: 1.5,
                atr_band_min: 0.0002,
                atr_band_max: 0.015,
                trend_tolerance: 0.0001,
                stale_confidence_cap: 40.0,
            },
            signal: SignalConfig {
                min_confidence: 75.0,
                target1_atr_multiple: 1.0,
                target2_atr_multiple: 2.0,
                stop_atr_multiple: 1.5,
                tick_size: Decimal::new(5, 2),
                suppression_history: 50,
            },
            session: SessionConfig {
                utc_offset_minutes: 330,
                market_open: hm(9, 15),
                opening_end: hm(10, 30),
                morning_end: hm(12, 0),
                afternoon_end: hm(14, 30),
                market_close: hm(15, 30),
                opening: SessionRule {
                    bonus: 8.0,
                    min_confidence: None,
                },
                morning: SessionRule {
                    bonus: 15.0,
                    min_confidence: None,
                },
                afternoon: SessionRule {
                    bonus: 5.0,
                    min_confidence: None,
                },
                closing: SessionRule {
                    bonus: -5.0,
                    min_confidence: Some(85.0),
                },
            },
            scheduler: SchedulerConfig {
                symbols: vec!["NIFTY".to_string(), "BANKNIFTY".to_string()],
                eval_interval_secs: 5,
            },
            tracking: TrackingConfig {
                max_open_secs: 1800,
                record_history: 200,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutated(change: impl FnOnce(&mut Config)) -> Config {
        let mut config = Config::default();
        change(&mut config);
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_period_beyond_capacity_is_rejected() {
        let mut config = Config::default();
        config.indicators.rsi_period = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rsi_period"), "{}", err);

        let mut config = Config::default();
        config.feed.capacity = 20;
        assert!(config.validate().is_err(), "macd_slow 26 cannot fit in 20 ticks");
    }

    #[test]
    fn test_macd_fast_must_be_below_slow() {
        let mut config = Config::default();
        config.indicators.macd_fast = 26;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_cap_must_be_below_threshold() {
        let mut config = Config::default();
        config.scoring.stale_confidence_cap = 75.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_parameters_are_rejected() {
        let mut config = Config::default();
        config.scoring.rsi_extreme_span = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rsi_extreme_span"), "{}", err);

        let rejected = [
            mutated(|c| c.scoring.volume_ratio_threshold = f64::NAN),
            mutated(|c| c.scoring.atr_band_min = f64::NAN),
            mutated(|c| c.scoring.atr_band_max = f64::INFINITY),
            mutated(|c| c.scoring.trend_tolerance = f64::NAN),
            mutated(|c| c.scoring.stale_confidence_cap = f64::NAN),
            mutated(|c| c.scoring.rsi_bias_margin = f64::NAN),
            mutated(|c| c.signal.stop_atr_multiple = f64::NAN),
            mutated(|c| c.session.morning.bonus = f64::NAN),
        ];
        for config in rejected {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_retry_delays_must_be_ordered() {
        let mut config = Config::default();
        config.feed.retry_initial_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feed.retry_max_ms = config.feed.retry_initial_ms - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_bonus_bounded_by_weight() {
        let mut config = Config::default();
        config.session.morning.bonus = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_session_windows_rejected() {
        let mut config = Config::default();
        config.session.morning_end = hm(10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "signal_pipeline_config_{}.json",
            std::process::id()
        ));
        let config = Config::default();
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.feed.capacity, config.feed.capacity);
        assert_eq!(loaded.session.market_open, config.session.market_open);
        assert_eq!(loaded.signal.tick_size, config.signal.tick_size);
        assert!(loaded.validate().is_ok());
    }
}
