//! Periodic OHLCV acquisition.
//!
//! Fetches candles for every subscribed symbol concurrently, joins on all
//! completions, and persists the batch into the daily partitions. Runs on
//! its own fixed interval, independent of the trading loop.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use reqwest::Client;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use super::CandleStore;
use crate::error::BrokerError;
use crate::models::Candle;

const CANDLE_GRANULARITY_SECS: u32 = 300;

/// Convert raw exchange rows into chronological candles newer than `since`
/// (or at least as new, when `inclusive`). Rows with out-of-range epoch
/// seconds are dropped.
fn candles_since(
    rows: Vec<(i64, f64, f64, f64, f64, f64)>,
    since: DateTime<Utc>,
    inclusive: bool,
    symbol: &str,
) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows
        .into_iter()
        .filter_map(|(time, low, high, open, close, volume)| {
            let timestamp = Utc.timestamp_opt(time, 0).single()?;
            let fresh = if inclusive {
                timestamp >= since
            } else {
                timestamp > since
            };
            fresh.then(|| Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
                symbol: symbol.to_string(),
            })
        })
        .collect();
    candles.sort_by_key(|c| c.timestamp);
    candles
}

pub struct MarketDataFeed {
    client: Client,
    rest_url: String,
    store: CandleStore,
    symbols: Vec<String>,
    last_timestamps: HashMap<String, DateTime<Utc>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl MarketDataFeed {
    pub fn new(
        rest_url: &str,
        data_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(BrokerError::Http)?;

        Ok(Self {
            client,
            rest_url: rest_url.to_string(),
            store: CandleStore::new(data_dir)?,
            symbols: Vec::new(),
            last_timestamps: HashMap::new(),
            poll_interval,
            shutdown,
        })
    }

    pub fn add_subscription(&mut self, symbols: &[String]) {
        for symbol in symbols {
            if !self.symbols.contains(symbol) {
                self.symbols.push(symbol.clone());
            }
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Fetch candles newer than the last seen timestamp for `symbol`. The
    /// first fetch of a run covers the whole current UTC day, the midnight
    /// candle included; afterwards only strictly newer candles pass.
    async fn fetch_ohlcv(&self, symbol: &str) -> Result<Vec<Candle>, BrokerError> {
        let (since, inclusive) = match self.last_timestamps.get(symbol) {
            Some(last) => (*last, false),
            None => (
                Utc::now()
                    .date_naive()
                    .and_time(chrono::NaiveTime::MIN)
                    .and_utc(),
                true,
            ),
        };

        let url = format!(
            "{}/products/{}/candles?granularity={}&start={}",
            self.rest_url,
            symbol,
            CANDLE_GRANULARITY_SECS,
            since.to_rfc3339()
        );

        // Coinbase returns rows as [time, low, high, open, close, volume],
        // newest first
        let rows: Vec<(i64, f64, f64, f64, f64, f64)> = self
            .client
            .get(&url)
            .header("User-Agent", "smartflow")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(candles_since(rows, since, inclusive, symbol))
    }

    /// One refresh: fan out a fetch per symbol, join on all of them, then
    /// persist the combined batch. A failed symbol is skipped this refresh
    /// and never aborts the others.
    pub async fn update_market_data(&mut self) -> crate::Result<()> {
        let symbols = self.symbols.clone();
        let results = join_all(symbols.iter().map(|s| self.fetch_ohlcv(s))).await;

        let mut fetched = Vec::new();
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(candles) if !candles.is_empty() => fetched.push((symbol.clone(), candles)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "candle fetch failed, skipping symbol this refresh");
                }
            }
        }

        self.persist_batch(fetched)
    }

    /// Append a fetched batch, then advance the per-symbol watermarks. The
    /// watermarks move only after the append succeeds, so candles from a
    /// failed write are re-fetched on the next refresh instead of falling
    /// into a permanent gap.
    fn persist_batch(&mut self, fetched: Vec<(String, Vec<Candle>)>) -> crate::Result<()> {
        if fetched.is_empty() {
            return Ok(());
        }

        let fresh: Vec<Candle> = fetched
            .iter()
            .flat_map(|(_, candles)| candles.iter().cloned())
            .collect();
        self.store.append(&fresh)?;
        tracing::info!(count = fresh.len(), "persisted fresh candles");

        for (symbol, candles) in fetched {
            if let Some(last) = candles.last() {
                self.last_timestamps.insert(symbol, last.timestamp);
            }
        }

        Ok(())
    }

    /// Refresh loop. Exits when the cancellation token fires.
    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        let mut ticks = interval(self.poll_interval);

        tracing::info!(
            symbols = self.symbols.len(),
            interval_s = self.poll_interval.as_secs(),
            "market data feed started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("market data feed shutting down");
                    break;
                }
                _ = ticks.tick() => {
                    if let Err(e) = self.update_market_data().await {
                        tracing::error!(error = %e, "market data refresh failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: DateTime<Utc>, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            symbol: "BTC-USD".to_string(),
        }
    }

    fn feed(data_dir: &std::path::Path) -> MarketDataFeed {
        MarketDataFeed::new(
            "https://example.invalid",
            data_dir,
            Duration::from_secs(300),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_first_fetch_keeps_midnight_candle() {
        let since = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let rows = vec![(since.timestamp(), 99.0, 101.0, 100.0, 100.5, 10.0)];

        // Day-start fetches include the candle stamped exactly at midnight;
        // incremental fetches exclude the already-persisted timestamp
        assert_eq!(candles_since(rows.clone(), since, true, "BTC-USD").len(), 1);
        assert!(candles_since(rows, since, false, "BTC-USD").is_empty());
    }

    #[test]
    fn test_rows_reordered_oldest_first() {
        let since = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        // Exchange rows arrive newest first
        let rows = vec![
            (since.timestamp() + 600, 99.0, 101.0, 100.0, 102.0, 10.0),
            (since.timestamp() + 300, 99.0, 101.0, 100.0, 101.0, 10.0),
        ];

        let candles = candles_since(rows, since, false, "BTC-USD");
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
    }

    #[test]
    fn test_persist_advances_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = feed(dir.path());

        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        feed.persist_batch(vec![(
            "BTC-USD".to_string(),
            vec![candle(ts, 100.0), candle(ts + chrono::Duration::minutes(5), 101.0)],
        )])
        .unwrap();

        assert_eq!(
            feed.last_timestamps["BTC-USD"],
            ts + chrono::Duration::minutes(5)
        );
        assert_eq!(feed.store.load_day(ts.date_naive()).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_append_leaves_watermark_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = feed(dir.path());

        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        // A directory squatting on the partition path makes the append fail
        std::fs::create_dir(feed.store.partition_path(ts.date_naive())).unwrap();

        let result = feed.persist_batch(vec![("BTC-USD".to_string(), vec![candle(ts, 100.0)])]);
        assert!(result.is_err());
        // The unwritten candle stays ahead of the watermark for a refetch
        assert!(feed.last_timestamps.is_empty());
    }

    #[test]
    fn test_subscriptions_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = MarketDataFeed::new(
            "https://example.invalid",
            dir.path(),
            Duration::from_secs(300),
            CancellationToken::new(),
        )
        .unwrap();

        feed.add_subscription(&["BTC-USD".to_string(), "ETH-USD".to_string()]);
        feed.add_subscription(&["BTC-USD".to_string()]);

        assert_eq!(feed.symbols(), &["BTC-USD", "ETH-USD"]);
    }

    #[tokio::test]
    async fn test_unreachable_exchange_does_not_error_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut feed = MarketDataFeed::new(
            // RFC 5737 test address, nothing listens here
            "http://192.0.2.1:1",
            dir.path(),
            Duration::from_secs(300),
            CancellationToken::new(),
        )
        .unwrap();
        feed.add_subscription(&["BTC-USD".to_string()]);

        // Per-symbol failures are isolated; the refresh itself succeeds
        assert!(feed.update_market_data().await.is_ok());
    }
}
