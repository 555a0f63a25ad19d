// src/pipeline.rs
use crate::config::Config;
use crate::domain::errors::{AppResult, TradingResult};
use crate::domain::models::Signal;
use crate::market_data::{spawn_ingestion, Backoff, MarketDataFeed, TickSource};
use crate::trading::{
    spawn_tracking, CallTracker, Clock, Evaluation, EvaluationScheduler, FeedEvaluator,
    SchedulerHandle, SchedulerStats, SignalGenerator,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Wires feed, generator, scheduler and call tracker around one validated
/// configuration.
pub struct SignalPipeline {
    config: Config,
    feed: Arc<MarketDataFeed>,
    generator: Arc<SignalGenerator>,
    scheduler: EvaluationScheduler,
    tracker: Arc<CallTracker>,
}

impl SignalPipeline {
    /// Fails on any configuration that could only break mid-run.
    pub fn new(config: Config) -> AppResult<Self> {
        config.validate()?;

        let feed = Arc::new(MarketDataFeed::new(&config.feed));
        let generator = Arc::new(SignalGenerator::from_config(&config));
        let scheduler = EvaluationScheduler::new(
            Arc::new(FeedEvaluator::new(feed.clone(), generator.clone())),
            Duration::from_secs(config.scheduler.eval_interval_secs),
        );
        let tracker = Arc::new(CallTracker::new(config.tracking.clone()));

        Ok(Self {
            config,
            feed,
            generator,
            scheduler,
            tracker,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.scheduler = self.scheduler.with_clock(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn feed(&self) -> Arc<MarketDataFeed> {
        self.feed.clone()
    }

    pub fn generator(&self) -> Arc<SignalGenerator> {
        self.generator.clone()
    }

    pub fn tracker(&self) -> Arc<CallTracker> {
        self.tracker.clone()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.scheduler.stats()
    }

    /// Emitted signals from the periodic scheduler
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.scheduler.subscribe()
    }

    /// One-off evaluation outside the schedule.
    pub fn evaluate(&self, symbol: &str, now: DateTime<Utc>) -> TradingResult<Evaluation> {
        self.generator.evaluate(&self.feed, symbol, now)
    }

    /// Start ingestion from `source`, periodic evaluation of the configured
    /// symbols and tracking of emitted calls. A pipeline starts once.
    pub fn start<S>(&self, source: S) -> TradingResult<RunningPipeline>
    where
        S: TickSource + 'static,
    {
        // Subscribe before the first evaluation can emit
        let signals = self.scheduler.subscribe();
        let scheduler = self.scheduler.start(&self.config.scheduler.symbols)?;

        let (producer_tx, producer_rx) = watch::channel(false);
        let producer = spawn_ingestion(
            source,
            self.feed.clone(),
            Backoff::from_config(&self.config.feed),
            producer_rx,
        );

        let (tracking_tx, tracking_rx) = watch::channel(false);
        let tracking = spawn_tracking(
            self.tracker.clone(),
            self.feed.clone(),
            signals,
            Duration::from_secs(self.config.scheduler.eval_interval_secs),
            self.scheduler.clock(),
            tracking_rx,
        );

        Ok(RunningPipeline {
            scheduler,
            producer_tx,
            producer,
            tracking_tx,
            tracking,
        })
    }
}

pub struct RunningPipeline {
    scheduler: SchedulerHandle,
    producer_tx: watch::Sender<bool>,
    producer: JoinHandle<()>,
    tracking_tx: watch::Sender<bool>,
    tracking: JoinHandle<()>,
}

impl RunningPipeline {
    /// Drain in-flight evaluations first, then halt the producer, then settle
    /// call tracking against the final feed state.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;

        let _ = self.producer_tx.send(true);
        if let Err(e) = self.producer.await {
            log::error!("Tick ingestion ended abnormally: {}", e);
        }

        let _ = self.tracking_tx.send(true);
        if let Err(e) = self.tracking.await {
            log::error!("Call tracking ended abnormally: {}", e);
        }
        log::info!("Pipeline stopped");
    }
}
