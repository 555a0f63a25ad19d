// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("No data available for: {0}")]
    NoData(String),

    #[error("Requested {requested} ticks but history capacity is {capacity}")]
    HistoryExceedsCapacity { requested: usize, capacity: usize },

    #[error("Invalid tick: {0}")]
    InvalidTick(String),

    #[error("Out-of-order tick for {symbol}: {tick} is older than {latest}")]
    OutOfOrder {
        symbol: String,
        tick: chrono::DateTime<chrono::Utc>,
        latest: chrono::DateTime<chrono::Utc>,
    },

    #[error("Data parse error: {0}")]
    Parse(String),

    #[error("Feed source error: {0}")]
    Source(String),
}

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Market data unavailable: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Evaluation task failed: {0}")]
    Task(String),

    #[error("Evaluation scheduler already started")]
    AlreadyStarted,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No prices to analyse for: {0}")]
    EmptySeries(String),

    #[error("Invalid indicator period: {0}")]
    InvalidPeriod(String),

    #[error("Misaligned series: high={high}, low={low}, close={close}")]
    MisalignedSeries { high: usize, low: usize, close: usize },
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type MarketDataResult<T> = Result<T, MarketDataError>;
pub type TradingResult<T> = Result<T, TradingError>;
pub type AnalysisResult<T> = Result<T, AnalysisError>;
