// src/trading/scheduler.rs
use crate::domain::errors::{MarketDataError, TradingError, TradingResult};
use crate::domain::models::Signal;
use crate::market_data::MarketDataFeed;
use crate::trading::signals::{Evaluation, SignalGenerator};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One evaluation of one symbol at one instant. Runs on a blocking thread.
pub trait SymbolEvaluator: Send + Sync {
    fn evaluate(&self, symbol: &str, now: DateTime<Utc>) -> TradingResult<Evaluation>;
}

/// Evaluates symbols against a shared feed.
pub struct FeedEvaluator {
    feed: Arc<MarketDataFeed>,
    generator: Arc<SignalGenerator>,
}

impl FeedEvaluator {
    pub fn new(feed: Arc<MarketDataFeed>, generator: Arc<SignalGenerator>) -> Self {
        Self { feed, generator }
    }
}

impl SymbolEvaluator for FeedEvaluator {
    fn evaluate(&self, symbol: &str, now: DateTime<Utc>) -> TradingResult<Evaluation> {
        self.generator.evaluate(&self.feed, symbol, now)
    }
}

/// Counters shared by all symbol loops.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    evaluations: AtomicU64,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
}

impl SchedulerStats {
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Periodically evaluates each symbol and broadcasts emitted signals.
///
/// Every symbol gets its own loop, so at most one evaluation per symbol is in
/// flight. Ticks that fire while an evaluation runs are skipped rather than
/// queued. A scheduler starts at most once.
pub struct EvaluationScheduler {
    evaluator: Arc<dyn SymbolEvaluator>,
    period: Duration,
    clock: Clock,
    signal_tx: broadcast::Sender<Signal>,
    stats: Arc<SchedulerStats>,
    started: AtomicBool,
}

impl EvaluationScheduler {
    pub fn new(evaluator: Arc<dyn SymbolEvaluator>, period: Duration) -> Self {
        let (signal_tx, _) = broadcast::channel(100);

        Self {
            evaluator,
            period,
            clock: Arc::new(Utc::now),
            signal_tx,
            stats: Arc::new(SchedulerStats::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the wall clock used for session and staleness decisions.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    /// Subscribe to emitted signals
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Spawn one evaluation loop per distinct symbol.
    ///
    /// A second call fails, since two loops for one symbol could overlap.
    pub fn start(&self, symbols: &[String]) -> TradingResult<SchedulerHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TradingError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let symbols: BTreeSet<String> = symbols.iter().cloned().collect();

        let tasks = symbols
            .into_iter()
            .map(|symbol| {
                let worker = SymbolWorker {
                    symbol,
                    evaluator: self.evaluator.clone(),
                    clock: self.clock.clone(),
                    signal_tx: self.signal_tx.clone(),
                    stats: self.stats.clone(),
                };
                tokio::spawn(worker.run(self.period, shutdown_rx.clone()))
            })
            .collect::<Vec<_>>();

        log::info!("Evaluation scheduler started for {} symbols every {:?}", tasks.len(), self.period);
        Ok(SchedulerHandle { shutdown_tx, tasks })
    }
}

struct SymbolWorker {
    symbol: String,
    evaluator: Arc<dyn SymbolEvaluator>,
    clock: Clock,
    signal_tx: broadcast::Sender<Signal>,
    stats: Arc<SchedulerStats>,
}

impl SymbolWorker {
    async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Shutdown is only observed between evaluations, so an in-flight
            // evaluation always completes. A dropped sender also stops the loop.
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = timer.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.evaluate_once().await;
        }

        log::debug!("Evaluation loop for {} stopped", self.symbol);
    }

    async fn evaluate_once(&self) {
        let evaluator = self.evaluator.clone();
        let symbol = self.symbol.clone();
        let now = (self.clock)();

        let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&symbol, now)).await;
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(Ok(Evaluation::Emitted(signal))) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                if self.signal_tx.send(signal).is_err() {
                    log::warn!("Signal for {} dropped: no subscribers", self.symbol);
                }
            }
            Ok(Ok(Evaluation::Suppressed(_))) => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(TradingError::MarketData(MarketDataError::NoData(_)))) => {
                log::debug!("No market data for {} yet", self.symbol);
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("Evaluation of {} failed: {}", self.symbol, e);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "{}",
                    TradingError::Task(format!("{} evaluation panicked: {}", self.symbol, e))
                );
            }
        }
    }
}

/// Running scheduler. Dropping it without `shutdown` also stops the loops
/// after their current evaluation, but does not wait for them.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop triggering new evaluations and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Evaluation loop ended abnormally: {}", e);
            }
        }
        log::info!("Evaluation scheduler drained");
    }
}
