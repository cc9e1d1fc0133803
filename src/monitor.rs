//! Ledger event monitor for the VRF coordinator.
//!
//! A single long-lived subscription loop turns `RequestQueued` logs into
//! processing jobs. Two mechanisms keep delivery gap-free across disconnects:
//!
//! 1. **Block cursor** — the monitor remembers the last block it observed;
//!    on every connect it establishes the live subscription first, then
//!    backfills the gap range with `get_logs` while fresh logs buffer in
//!    the stream (at-least-once delivery with overlap on both edges).
//! 2. **Dedup** — an in-memory seen-set keyed by request id filters the
//!    re-deliveries that at-least-once produces, so each request is
//!    dispatched to the pipeline at most once per process lifetime.

use ethers::contract::EthEvent;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, BlockNumber, Filter, Log, U256};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::coordinator::{decode_request_queued, RequestQueuedFilter};
use crate::error::OracleError;
use crate::metrics::Metrics;

/// Delay before reconnecting to the WebSocket after a disconnect or error.
const WS_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A randomness request observed on the ledger. Immutable once observed;
/// identity is `request_id`.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub request_id: U256,
    pub caller: Address,
    pub seed: U256,
}

/// Subscribes to `RequestQueued` events and dispatches each unique request
/// exactly once to the fulfillment pipeline.
pub struct RequestMonitor {
    config: AppConfig,
    tx: mpsc::Sender<QueuedRequest>,
    metrics: Arc<Metrics>,
    /// Request ids already dispatched this process lifetime.
    seen: HashSet<U256>,
    /// Last block a log was observed in; `None` until the first connect.
    cursor: Option<u64>,
}

impl RequestMonitor {
    pub fn new(config: AppConfig, tx: mpsc::Sender<QueuedRequest>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            tx,
            metrics,
            seen: HashSet::new(),
            cursor: None,
        }
    }

    /// Run the subscription loop until the downstream channel closes.
    /// Reconnects with a fixed delay on any subscription failure.
    pub async fn run(mut self) {
        loop {
            info!(url = %self.config.ws_url, "Connecting to ledger WebSocket");

            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("Fulfillment channel closed, stopping monitor");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Event subscription lost");
                }
            }

            info!(delay = ?WS_RECONNECT_DELAY, "Reconnecting");
            tokio::time::sleep(WS_RECONNECT_DELAY).await;
        }
    }

    /// One connection lifetime: backfill the gap since the cursor, then
    /// stream live logs until the subscription drops.
    ///
    /// Returns `Ok(())` only when the downstream channel has closed;
    /// subscription failures come back as [`OracleError::SubscriptionLost`].
    async fn connect_and_stream(&mut self) -> Result<(), OracleError> {
        let provider = Provider::<Ws>::connect(self.config.ws_url.as_str())
            .await
            .map_err(|e| OracleError::SubscriptionLost(format!("connect failed: {e}")))?;

        let latest = provider
            .get_block_number()
            .await
            .map_err(|e| OracleError::SubscriptionLost(format!("head query failed: {e}")))?
            .as_u64();

        // Subscribe before backfilling: `eth_subscribe("logs")` delivers
        // from its own establishment point, so logs landing while the
        // backfill runs buffer in the stream instead of falling into the
        // window between scan and subscription. Dedup absorbs the overlap.
        let mut stream = provider
            .subscribe_logs(&self.event_filter())
            .await
            .map_err(|e| OracleError::SubscriptionLost(format!("subscribe failed: {e}")))?;

        info!("Subscribed to RequestQueued events");

        if let Some((from, to)) = self.backfill_range(latest) {
            if !self.backfill(&provider, from, to).await? {
                return Ok(());
            }
        }
        // Only a completed scan moves the cursor: a failed first backfill
        // keeps the lookback window intact for the next attempt.
        self.commit_scanned_head(latest);

        while let Some(log) = stream.next().await {
            if !self.handle_log(log).await {
                return Ok(());
            }
        }

        Err(OracleError::SubscriptionLost("stream ended".into()))
    }

    /// Block range to backfill on this connection, if any.
    ///
    /// Re-covers the cursor block itself: a log later in that block may not
    /// have been delivered before the disconnect. On the first connect the
    /// range is the configured lookback window behind the head.
    fn backfill_range(&self, latest: u64) -> Option<(u64, u64)> {
        let from = match self.cursor {
            Some(cursor) => cursor,
            None if self.config.catch_up_lookback_blocks > 0 => {
                latest.saturating_sub(self.config.catch_up_lookback_blocks)
            }
            None => return None,
        };
        (from <= latest).then_some((from, latest))
    }

    /// Advance the cursor to a head whose history has been fully scanned.
    fn commit_scanned_head(&mut self, latest: u64) {
        if self.cursor.map_or(true, |c| c < latest) {
            self.cursor = Some(latest);
        }
    }

    /// Fetch and dispatch logs in `[from, to]`. Returns `false` when the
    /// downstream channel has closed.
    async fn backfill(
        &mut self,
        provider: &Provider<Ws>,
        from: u64,
        to: u64,
    ) -> Result<bool, OracleError> {
        info!(from, to, "Backfilling missed request logs");

        let filter = self
            .event_filter()
            .from_block(BlockNumber::Number(from.into()))
            .to_block(BlockNumber::Number(to.into()));

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| OracleError::SubscriptionLost(format!("backfill failed: {e}")))?;

        info!(count = logs.len(), "Backfill scan complete");

        for log in logs {
            if !self.handle_log(log).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn event_filter(&self) -> Filter {
        Filter::new()
            .address(self.config.contract_address)
            .topic0(RequestQueuedFilter::signature())
    }

    /// Decode, advance the cursor, dedup, and dispatch one log.
    /// Returns `false` when the downstream channel has closed.
    async fn handle_log(&mut self, log: Log) -> bool {
        if let Some(block) = log.block_number {
            let block = block.as_u64();
            if self.cursor.map_or(true, |c| block > c) {
                self.cursor = Some(block);
            }
        }

        let Some(request) = decode_request_queued(&log) else {
            warn!("Failed to decode RequestQueued log payload");
            return true;
        };

        self.dispatch(request).await
    }

    /// Dispatch a request unless it was already seen this process lifetime.
    /// Returns `false` when the downstream channel has closed.
    async fn dispatch(&mut self, request: QueuedRequest) -> bool {
        if !self.seen.insert(request.request_id) {
            debug!(
                request_id = %request.request_id,
                "Duplicate request delivery filtered"
            );
            return true;
        }

        info!(
            request_id = %request.request_id,
            caller = %format!("{:#x}", request.caller),
            seed = %request.seed,
            "Received randomness request"
        );
        self.metrics.record_request();

        if self.tx.send(request).await.is_err() {
            error!("Channel closed, stopping monitor");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{encode, Token};

    fn test_monitor(capacity: usize) -> (RequestMonitor, mpsc::Receiver<QueuedRequest>) {
        test_monitor_with_lookback(capacity, 0)
    }

    fn test_monitor_with_lookback(
        capacity: usize,
        lookback: u64,
    ) -> (RequestMonitor, mpsc::Receiver<QueuedRequest>) {
        let config = AppConfig {
            rpc_url: "http://127.0.0.1:8545".into(),
            ws_url: "ws://127.0.0.1:8546".into(),
            contract_address: Address::repeat_byte(0x11),
            chain_id: 31337,
            key_source_url: "http://127.0.0.1:8090".into(),
            key_derivation_path: "ethereum".into(),
            http_port: 3000,
            max_retries: 3,
            retry_delay_ms: 2000,
            fulfillment_concurrency: 4,
            catch_up_lookback_blocks: lookback,
        };
        let (tx, rx) = mpsc::channel(capacity);
        let monitor = RequestMonitor::new(config, tx, Arc::new(Metrics::new()));
        (monitor, rx)
    }

    fn queued_log(request_id: u64, block: u64) -> Log {
        let data = encode(&[
            Token::Uint(U256::from(request_id)),
            Token::Address(Address::repeat_byte(0x22)),
            Token::Uint(U256::from(30u64)),
        ]);
        Log {
            address: Address::repeat_byte(0x11),
            topics: vec![RequestQueuedFilter::signature()],
            data: data.into(),
            block_number: Some(block.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn decodes_and_dispatches_a_request_log() {
        let (mut monitor, mut rx) = test_monitor(4);

        assert!(monitor.handle_log(queued_log(7, 100)).await);

        let request = rx.try_recv().unwrap();
        assert_eq!(request.request_id, U256::from(7u64));
        assert_eq!(request.caller, Address::repeat_byte(0x22));
        assert_eq!(request.seed, U256::from(30u64));
        assert_eq!(monitor.cursor, Some(100));
    }

    #[tokio::test]
    async fn duplicate_deliveries_dispatch_at_most_once() {
        let (mut monitor, mut rx) = test_monitor(4);

        assert!(monitor.handle_log(queued_log(7, 100)).await);
        assert!(monitor.handle_log(queued_log(7, 101)).await);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        // Cursor still advances on the filtered re-delivery.
        assert_eq!(monitor.cursor, Some(101));
    }

    #[tokio::test]
    async fn distinct_requests_all_dispatch() {
        let (mut monitor, mut rx) = test_monitor(4);

        for id in 1..=3u64 {
            assert!(monitor.handle_log(queued_log(id, 100 + id)).await);
        }
        for _ in 0..3 {
            assert!(rx.try_recv().is_ok());
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let (mut monitor, _rx) = test_monitor(4);

        assert!(monitor.handle_log(queued_log(1, 100)).await);
        assert!(monitor.handle_log(queued_log(2, 90)).await);
        assert_eq!(monitor.cursor, Some(100));
    }

    #[tokio::test]
    async fn first_connect_scans_the_lookback_window() {
        let (monitor, _rx) = test_monitor_with_lookback(4, 50);
        assert_eq!(monitor.backfill_range(100), Some((50, 100)));

        let (monitor, _rx) = test_monitor(4);
        assert_eq!(monitor.backfill_range(100), None);
    }

    #[tokio::test]
    async fn reconnect_re_covers_the_cursor_block() {
        let (mut monitor, _rx) = test_monitor(4);
        monitor.cursor = Some(90);
        assert_eq!(monitor.backfill_range(100), Some((90, 100)));
        // Cursor at the head still re-scans that one block.
        monitor.cursor = Some(100);
        assert_eq!(monitor.backfill_range(100), Some((100, 100)));
        // A cursor past the queried head has nothing to scan.
        monitor.cursor = Some(101);
        assert_eq!(monitor.backfill_range(100), None);
    }

    #[tokio::test]
    async fn lookback_window_survives_until_a_scan_commits() {
        let (mut monitor, _rx) = test_monitor_with_lookback(4, 50);

        // A failed backfill leaves the cursor untouched, so the next
        // connection scans the same window instead of skipping it.
        assert_eq!(monitor.backfill_range(100), Some((50, 100)));
        assert_eq!(monitor.backfill_range(100), Some((50, 100)));
        assert_eq!(monitor.cursor, None);

        monitor.commit_scanned_head(100);
        assert_eq!(monitor.cursor, Some(100));
        assert_eq!(monitor.backfill_range(110), Some((100, 110)));
    }

    #[tokio::test]
    async fn commit_never_rewinds_a_live_cursor() {
        let (mut monitor, _rx) = test_monitor(4);

        // The live stream can outrun the scanned head while a backfill runs.
        assert!(monitor.handle_log(queued_log(1, 105)).await);
        monitor.commit_scanned_head(100);
        assert_eq!(monitor.cursor, Some(105));
    }

    #[tokio::test]
    async fn backfill_overlap_with_the_live_stream_dispatches_once() {
        let (mut monitor, mut rx) = test_monitor(4);

        // Same request observed once by the range scan and once by the
        // subscription that was established ahead of it.
        assert!(monitor.handle_log(queued_log(7, 100)).await);
        assert!(monitor.handle_log(queued_log(7, 100)).await);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_stops_dispatch() {
        let (mut monitor, rx) = test_monitor(1);
        drop(rx);

        assert!(!monitor.handle_log(queued_log(7, 100)).await);
    }

    #[tokio::test]
    async fn undecodable_logs_are_skipped() {
        let (mut monitor, mut rx) = test_monitor(4);

        let log = Log {
            address: Address::repeat_byte(0x11),
            topics: vec![RequestQueuedFilter::signature()],
            data: vec![0u8; 3].into(),
            block_number: Some(100.into()),
            ..Default::default()
        };
        assert!(monitor.handle_log(log).await);
        assert!(rx.try_recv().is_err());
    }
}
