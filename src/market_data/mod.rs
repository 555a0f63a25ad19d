// src/market_data/mod.rs
pub mod feed;
pub mod source;

pub use feed::{MarketDataFeed, SeriesSnapshot};
pub use source::{spawn_ingestion, Backoff, JsonLinesSource, TickSource};
