// src/market_data/source.rs
use crate::config::FeedConfig;
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::Tick;
use crate::market_data::feed::MarketDataFeed;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Producer side of the feed: anything that yields ticks.
#[async_trait]
pub trait TickSource: Send {
    /// Next tick, or `None` once the source is exhausted.
    async fn next_tick(&mut self) -> MarketDataResult<Option<Tick>>;

    /// Called after a failure, before ticks are requested again.
    async fn reconnect(&mut self) -> MarketDataResult<()> {
        Ok(())
    }
}

/// Reads one JSON-encoded tick per line.
pub struct JsonLinesSource<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TickSource for JsonLinesSource<R> {
    async fn next_tick(&mut self) -> MarketDataResult<Option<Tick>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| MarketDataError::Source(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }

            // Undecodable bytes only cost the line they sit on
            let line = std::str::from_utf8(&self.line)
                .map_err(|e| MarketDataError::Parse(format!("invalid UTF-8: {}", e)))?
                .trim();
            if line.is_empty() {
                continue;
            }
            let tick = serde_json::from_str::<Tick>(line)
                .map_err(|e| MarketDataError::Parse(format!("{}: {}", e, line)))?;
            return Ok(Some(tick));
        }
    }
}

/// Doubling delay between attempts to revive a failed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_initial_ms),
            Duration::from_millis(config.retry_max_ms),
        )
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .checked_mul(1u32 << attempt.min(20))
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Drive a tick source into the feed until it ends or shutdown is signalled.
///
/// Parse errors skip the offending tick. Any other source error marks every
/// symbol stale, then the source is reconnected after a backoff delay. Stale
/// marks clear per symbol as ticks flow again.
pub fn spawn_ingestion<S>(
    mut source: S,
    feed: Arc<MarketDataFeed>,
    backoff: Backoff,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: TickSource + 'static,
{
    tokio::spawn(async move {
        let mut recorded = 0usize;
        let mut failures = 0u32;
        loop {
            let next = tokio::select! {
                next = source.next_tick() => next,
                _ = shutdown.changed() => {
                    log::info!("Tick ingestion stopping after {} ticks", recorded);
                    return;
                }
            };

            match next {
                Ok(Some(tick)) => {
                    if failures > 0 {
                        log::info!("Tick source recovered after {} failed attempts", failures);
                        failures = 0;
                    }
                    match feed.record_tick(tick) {
                        Ok(()) => recorded += 1,
                        Err(e) => log::warn!("Rejected tick: {}", e),
                    }
                }
                Ok(None) => {
                    log::info!("Tick source exhausted after {} ticks", recorded);
                    return;
                }
                Err(MarketDataError::Parse(msg)) => {
                    log::warn!("Skipping malformed tick: {}", msg);
                }
                Err(e) => {
                    if failures == 0 {
                        feed.mark_all_stale();
                    }
                    let delay = backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    log::error!("Tick source failed: {}; retrying in {:?}", e, delay);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            log::info!("Tick ingestion stopping after {} ticks", recorded);
                            return;
                        }
                    }
                    if let Err(e) = source.reconnect().await {
                        log::warn!("Tick source reconnect failed: {}", e);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    const LINES: &str = concat!(
        r#"{"symbol":"NIFTY","price":"25000","volume":"1000","timestamp":"2026-10-19T04:00:00Z"}"#,
        "\n",
        "\n",
        "not json\n",
        r#"{"symbol":"NIFTY","price":"25010.5","volume":"1200","timestamp":"2026-10-19T04:00:05Z"}"#,
        "\n",
    );

    fn feed() -> Arc<MarketDataFeed> {
        Arc::new(MarketDataFeed::new(&FeedConfig {
            capacity: 10,
            staleness_secs: 3600,
            ..Config::default().feed
        }))
    }

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn tick(second: i64) -> Tick {
        let base = DateTime::parse_from_rfc3339("2026-10-19T04:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Tick::new(
            "NIFTY",
            dec!(25000) + rust_decimal::Decimal::from(second),
            dec!(1000),
            base + chrono::Duration::seconds(second),
        )
    }

    fn line(second: i64) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(&tick(second)).unwrap();
        bytes.push(b'\n');
        bytes
    }

    #[tokio::test]
    async fn test_json_lines_source_skips_blank_lines() {
        let mut source = JsonLinesSource::new(LINES.as_bytes());
        let first = source.next_tick().await.unwrap().unwrap();
        assert_eq!(first.symbol, "NIFTY");
        assert_eq!(first.price, dec!(25000));
        assert!(matches!(source.next_tick().await, Err(MarketDataError::Parse(_))));
        let second = source.next_tick().await.unwrap().unwrap();
        assert_eq!(second.price, dec!(25010.5));
        assert!(source.next_tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_a_parse_error() {
        let mut input = line(0);
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend(line(1));

        let mut source = JsonLinesSource::new(input.as_slice());
        assert!(source.next_tick().await.unwrap().is_some());
        assert!(matches!(source.next_tick().await, Err(MarketDataError::Parse(_))));
        assert_eq!(source.next_tick().await.unwrap().unwrap(), tick(1));
    }

    #[tokio::test]
    async fn test_ingestion_records_valid_ticks() {
        let feed = feed();
        let (_tx, rx) = watch::channel(false);
        let handle = spawn_ingestion(
            JsonLinesSource::new(LINES.as_bytes()),
            feed.clone(),
            fast_backoff(),
            rx,
        );
        handle.await.unwrap();

        assert_eq!(feed.history("NIFTY", 10).unwrap().len(), 2);
        assert_eq!(feed.latest("NIFTY").unwrap().volume, dec!(1200));
    }

    #[tokio::test]
    async fn test_corrupt_bytes_do_not_stop_ingestion() {
        let mut input = line(0);
        input.extend_from_slice(b"\xff\xfe garbage\n");
        for second in 1..=4 {
            input.extend(line(second));
        }

        let feed = feed();
        let (_tx, rx) = watch::channel(false);
        spawn_ingestion(
            JsonLinesSource::new(std::io::Cursor::new(input)),
            feed.clone(),
            fast_backoff(),
            rx,
        )
            .await
            .unwrap();

        assert_eq!(feed.history("NIFTY", 10).unwrap().len(), 5);
        assert!(!feed.is_stale("NIFTY", tick(4).timestamp));
    }

    /// Replays a fixed script of results, then reports exhaustion.
    struct ScriptedSource {
        script: VecDeque<MarketDataResult<Option<Tick>>>,
        reconnects: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl TickSource for ScriptedSource {
        async fn next_tick(&mut self) -> MarketDataResult<Option<Tick>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        async fn reconnect(&mut self) -> MarketDataResult<()> {
            self.reconnects
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transient_source_failure_is_retried() {
        let reconnects = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(tick(0))),
                Err(MarketDataError::Source("timeout".to_string())),
                Err(MarketDataError::Source("timeout".to_string())),
                Ok(Some(tick(1))),
                Ok(Some(tick(2))),
                Ok(Some(tick(3))),
            ]),
            reconnects: reconnects.clone(),
        };

        let feed = feed();
        let (_tx, rx) = watch::channel(false);
        spawn_ingestion(source, feed.clone(), fast_backoff(), rx)
            .await
            .unwrap();

        assert_eq!(feed.history("NIFTY", 10).unwrap().len(), 4);
        assert_eq!(reconnects.load(std::sync::atomic::Ordering::SeqCst), 2);
        // The stale mark from the outage clears once ticks flow again
        assert!(!feed.is_stale("NIFTY", tick(3).timestamp));
    }

    #[tokio::test]
    async fn test_source_failure_marks_feed_stale_until_recovery() {
        let reconnects = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut script: VecDeque<MarketDataResult<Option<Tick>>> = VecDeque::new();
        script.push_back(Ok(Some(tick(0))));
        for _ in 0..100 {
            script.push_back(Err(MarketDataError::Source("connection reset".to_string())));
        }
        let source = ScriptedSource { script, reconnects };

        let feed = feed();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_ingestion(
            source,
            feed.clone(),
            Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
            rx,
        );

        // Stuck in the first backoff delay
        tokio::time::timeout(Duration::from_secs(5), async {
            while !feed.is_stale("NIFTY", tick(0).timestamp) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("feed marked stale");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown interrupts the backoff")
            .unwrap();
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
        assert_eq!(
            Backoff::from_config(&Config::default().feed),
            Backoff::new(Duration::from_millis(500), Duration::from_millis(30_000))
        );
    }
}
