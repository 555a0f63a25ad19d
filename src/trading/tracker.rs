// src/trading/tracker.rs
use crate::config::TrackingConfig;
use crate::domain::models::{Direction, Signal, Tick};
use crate::market_data::MarketDataFeed;
use crate::trading::scheduler::Clock;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How a tracked call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallOutcome {
    Target2Hit,
    /// Target 1 was reached, then the stop or the time limit ended the call
    Target1Hit,
    StopLossHit,
    /// Neither a target nor the stop was reached in time
    Expired,
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CallOutcome::Target2Hit => write!(f, "target 2 hit"),
            CallOutcome::Target1Hit => write!(f, "target 1 hit"),
            CallOutcome::StopLossHit => write!(f, "stop loss hit"),
            CallOutcome::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallEvent {
    /// Price covered half the distance to target 1
    HalfwayToTarget,
    Target1Reached,
    /// Price covered half the distance to the stop
    WrongDirection,
    Closed(CallOutcome),
}

/// One change in a tracked call's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallUpdate {
    pub symbol: String,
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub event: CallEvent,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A resolved call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub signal: Signal,
    pub outcome: CallOutcome,
    pub exit_price: Decimal,
    pub closed_at: DateTime<Utc>,
    /// Price ended on the predicted side of entry
    pub correct: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub tracked: u64,
    pub open: u64,
    pub target1: u64,
    pub target2: u64,
    pub stopped: u64,
    pub expired: u64,
    pub correct: u64,
}

impl CallStats {
    pub fn resolved(&self) -> u64 {
        self.target1 + self.target2 + self.stopped + self.expired
    }

    /// Share of resolved calls that reached at least target 1.
    pub fn hit_rate(&self) -> Option<f64> {
        let resolved = self.resolved();
        (resolved > 0).then(|| (self.target1 + self.target2) as f64 / resolved as f64)
    }

    /// Share of resolved calls that ended on the predicted side.
    pub fn accuracy(&self) -> Option<f64> {
        let resolved = self.resolved();
        (resolved > 0).then(|| self.correct as f64 / resolved as f64)
    }

    fn absorb(&mut self, other: &CallStats) {
        self.tracked += other.tracked;
        self.open += other.open;
        self.target1 += other.target1;
        self.target2 += other.target2;
        self.stopped += other.stopped;
        self.expired += other.expired;
        self.correct += other.correct;
    }
}

#[derive(Debug)]
struct OpenCall {
    signal: Signal,
    last_seen: DateTime<Utc>,
    last_price: Decimal,
    halfway: bool,
    target1: bool,
    wrong_direction: bool,
}

impl OpenCall {
    fn new(signal: Signal) -> Self {
        Self {
            last_seen: signal.timestamp,
            last_price: signal.entry_price,
            signal,
            halfway: false,
            target1: false,
            wrong_direction: false,
        }
    }

    /// Signed move in the predicted direction.
    fn progress(&self, price: Decimal) -> Decimal {
        match self.signal.direction {
            Direction::Sell => self.signal.entry_price - price,
            _ => price - self.signal.entry_price,
        }
    }

    fn distance(&self, level: Decimal) -> Decimal {
        (level - self.signal.entry_price).abs()
    }

    fn update(&self, event: CallEvent, price: Decimal, timestamp: DateTime<Utc>) -> CallUpdate {
        CallUpdate {
            symbol: self.signal.symbol.clone(),
            direction: self.signal.direction,
            opened_at: self.signal.timestamp,
            event,
            price,
            timestamp,
        }
    }

    /// Apply one tick; returns the outcome when the call closes.
    fn observe(&mut self, tick: &Tick, updates: &mut Vec<CallUpdate>) -> Option<CallOutcome> {
        if tick.timestamp <= self.last_seen {
            return None;
        }
        self.last_seen = tick.timestamp;
        self.last_price = tick.price;

        let progress = self.progress(tick.price);
        let to_target1 = self.distance(self.signal.target1);
        let to_target2 = self.distance(self.signal.target2);
        let to_stop = self.distance(self.signal.stop_loss);

        if progress <= -to_stop {
            return Some(if self.target1 {
                CallOutcome::Target1Hit
            } else {
                CallOutcome::StopLossHit
            });
        }
        if progress >= to_target2 {
            return Some(CallOutcome::Target2Hit);
        }

        if !self.halfway && progress >= to_target1 / Decimal::TWO {
            self.halfway = true;
            updates.push(self.update(CallEvent::HalfwayToTarget, tick.price, tick.timestamp));
        }
        if !self.target1 && progress >= to_target1 {
            self.target1 = true;
            updates.push(self.update(CallEvent::Target1Reached, tick.price, tick.timestamp));
        }
        if !self.wrong_direction && progress <= -to_stop / Decimal::TWO {
            self.wrong_direction = true;
            updates.push(self.update(CallEvent::WrongDirection, tick.price, tick.timestamp));
        }
        None
    }

    fn expiry_outcome(&self) -> CallOutcome {
        if self.target1 {
            CallOutcome::Target1Hit
        } else {
            CallOutcome::Expired
        }
    }

    fn close(self, outcome: CallOutcome, closed_at: DateTime<Utc>) -> CallRecord {
        let correct = match outcome {
            CallOutcome::Target1Hit | CallOutcome::Target2Hit => true,
            CallOutcome::StopLossHit => false,
            CallOutcome::Expired => self.progress(self.last_price) > Decimal::ZERO,
        };
        CallRecord {
            exit_price: self.last_price,
            signal: self.signal,
            outcome,
            closed_at,
            correct,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolCalls {
    open: Vec<OpenCall>,
    closed: VecDeque<CallRecord>,
    stats: CallStats,
}

/// Follows emitted calls against later ticks until a target, the stop or the
/// time limit resolves them, and keeps per-symbol hit rates.
pub struct CallTracker {
    config: TrackingConfig,
    calls: Mutex<HashMap<String, SymbolCalls>>,
}

impl CallTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Open a call for an emitted signal. Only ticks after the signal count.
    pub fn track(&self, signal: Signal) {
        if signal.direction == Direction::Hold {
            return;
        }
        log::info!("Tracking {} {} from {}", signal.direction, signal.symbol, signal.entry_price);
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = calls.entry(signal.symbol.clone()).or_default();
        entry.stats.tracked += 1;
        entry.stats.open += 1;
        entry.open.push(OpenCall::new(signal));
    }

    /// Advance every open call of the tick's symbol.
    pub fn observe(&self, tick: &Tick) -> Vec<CallUpdate> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updates = Vec::new();
        if let Some(entry) = calls.get_mut(&tick.symbol) {
            self.advance(entry, std::slice::from_ref(tick), &mut updates);
        }
        updates
    }

    /// Pull new ticks for symbols with open calls from the feed, then expire
    /// calls older than the time limit.
    ///
    /// Ticks that share a timestamp with the last one a call has seen are
    /// skipped.
    pub fn sync(&self, feed: &MarketDataFeed, now: DateTime<Utc>) -> Vec<CallUpdate> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updates = Vec::new();
        for (symbol, entry) in calls.iter_mut() {
            if entry.open.is_empty() {
                continue;
            }
            match feed.history(symbol, feed.capacity()) {
                Ok(ticks) => self.advance(entry, &ticks, &mut updates),
                Err(e) => log::debug!("No ticks to track {} calls: {}", symbol, e),
            }
            self.expire(entry, now, &mut updates);
        }
        updates
    }

    fn advance(&self, entry: &mut SymbolCalls, ticks: &[Tick], updates: &mut Vec<CallUpdate>) {
        let mut still_open = Vec::with_capacity(entry.open.len());
        for mut call in entry.open.drain(..) {
            let mut closed = None;
            for tick in ticks {
                if let Some(outcome) = call.observe(tick, updates) {
                    closed = Some((outcome, tick.timestamp));
                    break;
                }
            }
            match closed {
                Some((outcome, at)) => {
                    updates.push(call.update(CallEvent::Closed(outcome), call.last_price, at));
                    let record = call.close(outcome, at);
                    Self::record(&self.config, &mut entry.stats, &mut entry.closed, record);
                }
                None => still_open.push(call),
            }
        }
        entry.open = still_open;
    }

    fn expire(&self, entry: &mut SymbolCalls, now: DateTime<Utc>, updates: &mut Vec<CallUpdate>) {
        let limit = Duration::seconds(self.config.max_open_secs);
        let (expired, still_open): (Vec<_>, Vec<_>) = entry
            .open
            .drain(..)
            .partition(|call| now - call.signal.timestamp >= limit);
        entry.open = still_open;
        for call in expired {
            let outcome = call.expiry_outcome();
            updates.push(call.update(CallEvent::Closed(outcome), call.last_price, now));
            let record = call.close(outcome, now);
            Self::record(&self.config, &mut entry.stats, &mut entry.closed, record);
        }
    }

    fn record(
        config: &TrackingConfig,
        stats: &mut CallStats,
        closed: &mut VecDeque<CallRecord>,
        record: CallRecord,
    ) {
        log::info!(
            "{} {} call closed: {} at {} ({})",
            record.signal.direction,
            record.signal.symbol,
            record.outcome,
            record.exit_price,
            if record.correct { "correct" } else { "wrong" }
        );
        stats.open = stats.open.saturating_sub(1);
        match record.outcome {
            CallOutcome::Target1Hit => stats.target1 += 1,
            CallOutcome::Target2Hit => stats.target2 += 1,
            CallOutcome::StopLossHit => stats.stopped += 1,
            CallOutcome::Expired => stats.expired += 1,
        }
        if record.correct {
            stats.correct += 1;
        }
        if config.record_history > 0 {
            if closed.len() == config.record_history {
                closed.pop_front();
            }
            closed.push_back(record);
        }
    }

    /// Signals of calls still open for a symbol.
    pub fn open_calls(&self, symbol: &str) -> Vec<Signal> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|entry| entry.open.iter().map(|call| call.signal.clone()).collect())
            .unwrap_or_default()
    }

    /// Resolved calls for a symbol, oldest first.
    pub fn records(&self, symbol: &str) -> Vec<CallRecord> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|entry| entry.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, symbol: &str) -> CallStats {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|entry| entry.stats)
            .unwrap_or_default()
    }

    /// Stats summed over every symbol.
    pub fn overall(&self) -> CallStats {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total = CallStats::default();
        for entry in calls.values() {
            total.absorb(&entry.stats);
        }
        total
    }
}

/// Track every broadcast signal and resolve open calls from the feed every
/// `period`. On shutdown, signals still queued are tracked and one final sync
/// runs before the task ends.
pub fn spawn_tracking(
    tracker: Arc<CallTracker>,
    feed: Arc<MarketDataFeed>,
    mut signals: broadcast::Receiver<Signal>,
    period: tokio::time::Duration,
    clock: Clock,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut subscribed = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = signals.recv(), if subscribed => match received {
                    Ok(signal) => {
                        tracker.sync(&feed, clock());
                        tracker.track(signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Call tracker lagged, {} signals not tracked", skipped);
                    }
                    Err(RecvError::Closed) => subscribed = false,
                },
                _ = timer.tick() => {
                    tracker.sync(&feed, clock());
                }
            }
        }

        // Calls broadcast just before shutdown are still tracked
        while let Ok(signal) = signals.try_recv() {
            tracker.track(signal);
        }
        tracker.sync(&feed, clock());
        let stats = tracker.overall();
        log::info!(
            "Call tracking stopped: {} tracked, {} resolved, {} open",
            stats.tracked,
            stats.resolved(),
            stats.open
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::models::Session;
    use rust_decimal_macros::dec;

    fn at(second: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T05:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(second)
    }

    fn call(direction: Direction) -> Signal {
        let (target1, target2, stop_loss) = match direction {
            Direction::Sell => (dec!(24990), dec!(24980), dec!(25015)),
            _ => (dec!(25010), dec!(25020), dec!(24985)),
        };
        Signal {
            symbol: "NIFTY".to_string(),
            direction,
            confidence: 90.0,
            entry_price: dec!(25000),
            target1,
            target2,
            stop_loss,
            session: Session::Morning,
            timestamp: at(0),
            reasoning: String::new(),
        }
    }

    fn tick(price: Decimal, second: i64) -> Tick {
        Tick::new("NIFTY", price, dec!(1000), at(second))
    }

    fn tracker() -> CallTracker {
        CallTracker::new(Config::default().tracking)
    }

    fn events(updates: &[CallUpdate]) -> Vec<CallEvent> {
        updates.iter().map(|u| u.event).collect()
    }

    #[test]
    fn test_buy_call_milestones_then_target2() {
        let tracker = tracker();
        tracker.track(call(Direction::Buy));

        assert_eq!(
            events(&tracker.observe(&tick(dec!(25005), 1))),
            vec![CallEvent::HalfwayToTarget]
        );
        assert_eq!(
            events(&tracker.observe(&tick(dec!(25011), 2))),
            vec![CallEvent::Target1Reached]
        );
        assert_eq!(
            events(&tracker.observe(&tick(dec!(25020), 3))),
            vec![CallEvent::Closed(CallOutcome::Target2Hit)]
        );

        assert!(tracker.open_calls("NIFTY").is_empty());
        let records = tracker.records("NIFTY");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].exit_price, dec!(25020));
        assert!(records[0].correct);

        let stats = tracker.stats("NIFTY");
        assert_eq!(stats.target2, 1);
        assert_eq!(stats.hit_rate(), Some(1.0));
    }

    #[test]
    fn test_sell_call_stopped_out_after_wrong_direction() {
        let tracker = tracker();
        tracker.track(call(Direction::Sell));

        assert_eq!(
            events(&tracker.observe(&tick(dec!(25008), 1))),
            vec![CallEvent::WrongDirection]
        );
        assert_eq!(
            events(&tracker.observe(&tick(dec!(25015), 2))),
            vec![CallEvent::Closed(CallOutcome::StopLossHit)]
        );

        let stats = tracker.stats("NIFTY");
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.hit_rate(), Some(0.0));
        assert_eq!(stats.accuracy(), Some(0.0));
    }

    #[test]
    fn test_stop_after_target1_counts_as_target1() {
        let tracker = tracker();
        tracker.track(call(Direction::Buy));
        tracker.observe(&tick(dec!(25012), 1));
        let updates = tracker.observe(&tick(dec!(24980), 2));

        assert_eq!(events(&updates), vec![CallEvent::Closed(CallOutcome::Target1Hit)]);
        assert_eq!(tracker.stats("NIFTY").target1, 1);
    }

    #[test]
    fn test_ticks_before_the_call_are_ignored() {
        let tracker = tracker();
        let mut signal = call(Direction::Buy);
        signal.timestamp = at(10);
        tracker.track(signal);

        assert!(tracker.observe(&tick(dec!(25030), 5)).is_empty());
        assert_eq!(tracker.open_calls("NIFTY").len(), 1);
    }

    #[test]
    fn test_sync_reads_feed_and_expires_old_calls() {
        let config = Config::default();
        let feed = MarketDataFeed::new(&config.feed);
        let tracker = CallTracker::new(config.tracking.clone());
        tracker.track(call(Direction::Buy));

        feed.record_tick(tick(dec!(25002), 1)).unwrap();
        feed.record_tick(tick(dec!(25003), 2)).unwrap();
        assert!(tracker.sync(&feed, at(2)).is_empty());
        assert_eq!(tracker.stats("NIFTY").open, 1);

        let updates = tracker.sync(&feed, at(config.tracking.max_open_secs));
        assert_eq!(events(&updates), vec![CallEvent::Closed(CallOutcome::Expired)]);

        let records = tracker.records("NIFTY");
        assert_eq!(records[0].outcome, CallOutcome::Expired);
        assert_eq!(records[0].exit_price, dec!(25003));
        assert!(records[0].correct, "expired above entry on a BUY");

        let stats = tracker.stats("NIFTY");
        assert_eq!(stats.open, 0);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.hit_rate(), Some(0.0));
        assert_eq!(stats.accuracy(), Some(1.0));
    }

    #[test]
    fn test_record_history_is_bounded() {
        let mut config = Config::default().tracking;
        config.record_history = 2;
        let tracker = CallTracker::new(config);
        for round in 0..4i64 {
            let mut signal = call(Direction::Buy);
            signal.timestamp = at(round * 10);
            tracker.track(signal);
            tracker.observe(&tick(dec!(25020), round * 10 + 1));
        }

        assert_eq!(tracker.records("NIFTY").len(), 2);
        assert_eq!(tracker.stats("NIFTY").target2, 4);
        assert_eq!(tracker.overall().tracked, 4);
    }

    #[tokio::test]
    async fn test_tracking_task_follows_broadcast_signals() {
        let config = Config::default();
        let feed = Arc::new(MarketDataFeed::new(&config.feed));
        let tracker = Arc::new(CallTracker::new(config.tracking.clone()));
        let (signal_tx, signal_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_tracking(
            tracker.clone(),
            feed.clone(),
            signal_rx,
            tokio::time::Duration::from_millis(5),
            Arc::new(|| at(5)),
            shutdown_rx,
        );
        signal_tx.send(call(Direction::Buy)).unwrap();
        tokio::time::timeout(tokio::time::Duration::from_secs(5), async {
            while tracker.stats("NIFTY").tracked == 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("signal tracked");

        feed.record_tick(tick(dec!(25025), 3)).unwrap();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(tracker.stats("NIFTY").target2, 1);
    }
}
