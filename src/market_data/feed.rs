// src/market_data/feed.rs
use crate::config::FeedConfig;
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::Tick;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Bounded FIFO of ticks for one symbol.
#[derive(Debug)]
struct RollingSeries {
    ticks: VecDeque<Tick>,
    capacity: usize,
    marked_stale: bool,
}

impl RollingSeries {
    fn new(capacity: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
            marked_stale: false,
        }
    }

    fn push(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
        self.marked_stale = false;
    }

    fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.ticks.back() {
            Some(last) => self.marked_stale || now - last.timestamp > window,
            None => true,
        }
    }
}

/// Consistent copy of one symbol's series taken under a single lock.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub symbol: String,
    pub ticks: Vec<Tick>,
    pub stale: bool,
}

impl SeriesSnapshot {
    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.last()
    }

    pub fn close_prices(&self) -> Vec<f64> {
        self.ticks.iter().map(Tick::price_f64).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.ticks.iter().map(Tick::volume_f64).collect()
    }
}

/// Per-symbol rolling tick store shared between the producer and evaluators.
///
/// Each symbol's series sits behind its own mutex, so ingestion for one symbol
/// never blocks another. The outer map lock is only held long enough to look
/// up or insert a series handle.
pub struct MarketDataFeed {
    series: RwLock<HashMap<String, Arc<Mutex<RollingSeries>>>>,
    capacity: usize,
    staleness: Duration,
}

impl MarketDataFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            staleness: Duration::seconds(config.staleness_secs),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn handle(&self, symbol: &str) -> Option<Arc<Mutex<RollingSeries>>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    fn handle_or_insert(&self, symbol: &str) -> Arc<Mutex<RollingSeries>> {
        if let Some(handle) = self.handle(symbol) {
            return handle;
        }
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        series
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RollingSeries::new(self.capacity))))
            .clone()
    }

    /// Append a tick, evicting the oldest one when the series is full.
    pub fn record_tick(&self, tick: Tick) -> MarketDataResult<()> {
        tick.validate()?;

        let handle = self.handle_or_insert(&tick.symbol);
        let mut series = handle.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = series.ticks.back() {
            if tick.timestamp < last.timestamp {
                return Err(MarketDataError::OutOfOrder {
                    symbol: tick.symbol.clone(),
                    tick: tick.timestamp,
                    latest: last.timestamp,
                });
            }
        }

        if series.marked_stale {
            log::info!("{} feed resumed at {}", tick.symbol, tick.timestamp);
        }
        series.push(tick);
        Ok(())
    }

    /// Most recent tick for a symbol.
    pub fn latest(&self, symbol: &str) -> MarketDataResult<Tick> {
        let handle = self
            .handle(symbol)
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        let series = handle.lock().unwrap_or_else(PoisonError::into_inner);
        series
            .ticks
            .back()
            .cloned()
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
    }

    /// Up to `n` most recent ticks, oldest first.
    pub fn history(&self, symbol: &str, n: usize) -> MarketDataResult<Vec<Tick>> {
        if n > self.capacity {
            return Err(MarketDataError::HistoryExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }
        let handle = self
            .handle(symbol)
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        let series = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = series.ticks.len().saturating_sub(n);
        Ok(series.ticks.iter().skip(skip).cloned().collect())
    }

    /// Whole series plus staleness, read under one lock.
    pub fn snapshot(&self, symbol: &str, now: DateTime<Utc>) -> MarketDataResult<SeriesSnapshot> {
        let handle = self
            .handle(symbol)
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))?;
        let series = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if series.ticks.is_empty() {
            return Err(MarketDataError::NoData(symbol.to_string()));
        }
        Ok(SeriesSnapshot {
            symbol: symbol.to_string(),
            ticks: series.ticks.iter().cloned().collect(),
            stale: series.is_stale(now, self.staleness),
        })
    }

    /// True when the symbol was marked stale or its last tick is too old.
    /// Symbols never seen are stale.
    pub fn is_stale(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.handle(symbol) {
            Some(handle) => handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_stale(now, self.staleness),
            None => true,
        }
    }

    /// Flag a symbol stale until its next tick arrives.
    pub fn mark_stale(&self, symbol: &str) {
        if let Some(handle) = self.handle(symbol) {
            handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .marked_stale = true;
            log::warn!("{} marked stale", symbol);
        }
    }

    pub fn mark_all_stale(&self) {
        for symbol in self.symbols() {
            self.mark_stale(&symbol);
        }
    }

    /// Symbols with at least one recorded tick, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let mut symbols: Vec<String> = series.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}
