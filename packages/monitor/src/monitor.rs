//! Whale Monitor
//!
//! Owns the shared state and the three long-lived tasks: the subscriber, the
//! price poller and the writer. The writer is the only task that mutates the
//! transaction book. The presentation layer reads snapshots and changes the
//! threshold; it never touches the book directly.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ConfigError, MonitorConfig};
use crate::filter::{AdmissionGate, Threshold, ThresholdError};
use crate::format::{DisplayWidth, Formatter, WhaleRow};
use crate::node::ConnectionStatus;
use crate::price::{
    run_price_poller, HttpPriceSource, PriceCache, PriceError, PriceQuote, PriceSource,
};
use crate::record::TransactionRecord;
use crate::stats::{MonitorStats, StatsSnapshot};
use crate::store::{Admission, TransactionBook};
use crate::subscriber::{MonitorEvent, Subscriber};

/// Errors from the monitor lifecycle
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Price source error: {0}")]
    Price(#[from] PriceError),

    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Monitor must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Consistent view of the monitor handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    /// Records at or above the threshold, highest value first
    pub whales: Vec<TransactionRecord>,
    /// Latest ETH price, if one has been fetched
    pub price: Option<PriceQuote>,
    /// Latest known chain height
    pub block_height: Option<u64>,
    pub threshold: Threshold,
    pub status: ConnectionStatus,
    /// Records stored regardless of threshold
    pub total_records: usize,
}

impl MonitorSnapshot {
    /// True while no record meets the threshold
    pub fn is_waiting_for_whales(&self) -> bool {
        self.whales.is_empty()
    }
}

struct WhaleState {
    book: TransactionBook,
    threshold: Threshold,
    block_height: Option<u64>,
}

/// Shared state plus the revision counter observers wait on
#[derive(Clone)]
struct SharedState {
    inner: Arc<RwLock<WhaleState>>,
    revision: Arc<watch::Sender<u64>>,
    stats: Arc<MonitorStats>,
}

impl SharedState {
    fn new(config: &MonitorConfig, stats: Arc<MonitorStats>) -> Self {
        let state = WhaleState {
            book: TransactionBook::new(config.max_records),
            threshold: config.threshold,
            block_height: None,
        };
        Self {
            inner: Arc::new(RwLock::new(state)),
            revision: Arc::new(watch::channel(0).0),
            stats,
        }
    }

    fn touch(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn admit(&self, record: TransactionRecord) -> Admission {
        let hash = record.hash;
        let value = record.display_value;
        let admission = self.inner.write().book.admit(record);

        match admission {
            Admission::Inserted => {
                MonitorStats::bump(&self.stats.admitted);
                info!("Admitted transaction {:#x} ({} ETH)", hash, value);
                self.touch();
            }
            Admission::Duplicate => MonitorStats::bump(&self.stats.duplicates),
            Admission::BelowGate => {}
        }
        admission
    }

    fn set_block_height(&self, height: u64) {
        {
            let mut state = self.inner.write();
            // Lookups can complete out of order
            if state.block_height.is_some_and(|current| current >= height) {
                return;
            }
            state.block_height = Some(height);
        }
        debug!("Block height {}", height);
        self.touch();
    }

    fn apply(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Admitted(record) => {
                self.admit(record);
            }
            MonitorEvent::NewBlock(height) => self.set_block_height(height),
        }
    }
}

/// Drain events into the shared state until cancelled
///
/// Events that arrive after cancellation are dropped without being applied.
async fn run_writer(
    state: SharedState,
    mut events: mpsc::Receiver<MonitorEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    state.apply(event);
                }
                None => break,
            },
        }
    }
    debug!("Writer stopped");
}

struct RunningTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Lifecycle controller for whale monitoring
pub struct WhaleMonitor {
    config: MonitorConfig,
    gate: AdmissionGate,
    state: SharedState,
    prices: PriceCache,
    status: Arc<watch::Sender<ConnectionStatus>>,
    stats: Arc<MonitorStats>,
    running: Option<RunningTasks>,
}

impl WhaleMonitor {
    /// Build a monitor fetching prices over HTTP
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let source = HttpPriceSource::new(&config.price)?;
        Self::with_price_source(config, Arc::new(source))
    }

    /// Build a monitor with a custom price source
    pub fn with_price_source(
        config: MonitorConfig,
        source: Arc<dyn PriceSource>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        let stats = Arc::new(MonitorStats::new());
        Ok(Self {
            gate: config.admission_gate(),
            state: SharedState::new(&config, stats.clone()),
            prices: PriceCache::new(source),
            status: Arc::new(watch::channel(ConnectionStatus::Disconnected).0),
            stats,
            running: None,
            config,
        })
    }

    /// Start the subscriber, price poller and writer
    ///
    /// Both the subscriber and the poller start right away; ingestion never
    /// waits for the first price.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.running.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let block_signal = Arc::new(Notify::new());
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);

        info!(
            "Starting whale monitor ({} mode, admission >= {} ETH, threshold {} ETH)",
            self.config.mode,
            self.gate.min_value(),
            self.threshold()
        );

        let writer = runtime.spawn(run_writer(self.state.clone(), events_rx, cancel.clone()));

        let poller_state = self.state.clone();
        let poller_stats = self.stats.clone();
        let prices = self.prices.clone();
        let period = self.config.price.refresh_interval;
        let poller_signal = block_signal.clone();
        let poller_cancel = cancel.clone();
        let poller = runtime.spawn(run_price_poller(
            prices,
            period,
            poller_signal,
            poller_cancel,
            move |result| match result {
                Ok(_) => poller_state.touch(),
                Err(_) => MonitorStats::bump(&poller_stats.price_failures),
            },
        ));

        let subscriber = Subscriber::new(
            self.config.node.clone(),
            self.config.mode,
            self.gate,
            events_tx,
            self.status.clone(),
            block_signal,
            self.stats.clone(),
        );
        let subscriber_cancel = cancel.clone();
        let subscriber = runtime.spawn(async move {
            if let Err(e) = subscriber.run(subscriber_cancel).await {
                error!("Subscriber terminated: {}", e);
            }
        });

        self.running = Some(RunningTasks {
            cancel,
            handles: vec![writer, poller, subscriber],
        });
        Ok(())
    }

    /// Stop all tasks and wait for them to finish
    ///
    /// No state is mutated once this returns. Calling it on a stopped monitor
    /// is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Monitor task panicked: {}", e);
                }
            }
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("Whale monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Offer a resolved record directly, bypassing the node subscription
    ///
    /// The admission gate and deduplication still apply.
    pub fn ingest(&self, record: TransactionRecord) -> Admission {
        if !self.gate.allows(record.value) {
            MonitorStats::bump(&self.stats.gate_rejections);
            return Admission::BelowGate;
        }
        self.state.admit(record)
    }

    /// Consistent view of whales, price, height, threshold and status
    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.inner.read();
        MonitorSnapshot {
            whales: state.book.whales(state.threshold),
            price: self.prices.current(),
            block_height: state.block_height,
            threshold: state.threshold,
            status: *self.status.borrow(),
            total_records: state.book.len(),
        }
    }

    /// Records at or above the current threshold
    pub fn whales(&self) -> Vec<TransactionRecord> {
        let state = self.state.inner.read();
        state.book.whales(state.threshold)
    }

    pub fn price(&self) -> Option<PriceQuote> {
        self.prices.current()
    }

    pub fn block_height(&self) -> Option<u64> {
        self.state.inner.read().block_height
    }

    pub fn threshold(&self) -> Threshold {
        self.state.inner.read().threshold
    }

    /// Change the whale threshold
    ///
    /// Negative and non-finite values are rejected and the current threshold
    /// is kept.
    pub fn set_threshold(&self, value: f64) -> Result<Threshold, ThresholdError> {
        let threshold = Threshold::new(value)?;
        self.apply_threshold(threshold);
        Ok(threshold)
    }

    /// Change the whale threshold, clamping negative input to zero
    pub fn set_threshold_clamped(&self, value: f64) -> Result<Threshold, ThresholdError> {
        let threshold = Threshold::clamped(value)?;
        self.apply_threshold(threshold);
        Ok(threshold)
    }

    fn apply_threshold(&self, threshold: Threshold) {
        self.state.inner.write().threshold = threshold;
        info!("Whale threshold set to {} ETH", threshold);
        self.state.touch();
    }

    /// Current subscription state
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every connection state change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Receiver notified whenever the snapshot may have changed
    pub fn watch_updates(&self) -> watch::Receiver<u64> {
        self.state.revision.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared price cache
    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    /// Formatting façade bound to this monitor's price cache
    pub fn formatter(&self, width: Arc<dyn DisplayWidth>) -> Formatter {
        Formatter::new(self.prices.clone(), width)
    }

    /// Display rows for the current whale view
    pub fn rows(&self, formatter: &Formatter) -> Vec<WhaleRow> {
        self.whales().iter().map(|record| formatter.row(record)).collect()
    }
}

impl Drop for WhaleMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FixedWidth;
    use crate::price::MockPriceSource;
    use alloy::primitives::{Address, TxHash};
    use std::time::Duration;

    fn record(id: u8, value: f64) -> TransactionRecord {
        let hash = TxHash::repeat_byte(id);
        TransactionRecord::new(hash, Address::repeat_byte(id), None, value, id as u64, None)
    }

    fn test_config() -> MonitorConfig {
        let mut config = MonitorConfig::with_node_url("/nonexistent/whalewatch.ipc");
        config.min_admission_eth = 0.1;
        config.node.max_reconnect_attempts = 1;
        config.node.initial_backoff_ms = 1;
        config.node.max_backoff_ms = 1;
        config
    }

    fn monitor_with_price(price: f64) -> WhaleMonitor {
        let mut source = MockPriceSource::new();
        source.expect_fetch_usd_price().returning(move || Ok(price));
        WhaleMonitor::with_price_source(test_config(), Arc::new(source)).unwrap()
    }

    // ==================== Ingestion tests ====================

    #[test]
    fn test_threshold_scenario_hides_small_record() {
        let monitor = monitor_with_price(2000.0);
        monitor.set_threshold(10.0).unwrap();

        assert_eq!(monitor.ingest(record(1, 5.0)), Admission::Inserted);
        assert_eq!(monitor.ingest(record(2, 15.0)), Admission::Inserted);

        let whales = monitor.whales();
        assert_eq!(whales.len(), 1);
        assert_eq!(whales[0].display_value, 15.0);
        assert_eq!(monitor.snapshot().total_records, 2);
    }

    #[test]
    fn test_ingest_applies_admission_gate() {
        let monitor = monitor_with_price(2000.0);
        assert_eq!(monitor.ingest(record(1, 0.05)), Admission::BelowGate);
        assert_eq!(monitor.set_threshold(0.0).unwrap(), Threshold::ZERO);
        assert!(monitor.whales().is_empty());
        assert_eq!(monitor.stats().gate_rejections, 1);

        // Rejected below the gate, so the hash was never marked as seen
        assert_eq!(monitor.ingest(record(1, 0.5)), Admission::Inserted);
    }

    #[test]
    fn test_ingest_duplicate_keeps_first_timestamp() {
        let monitor = monitor_with_price(2000.0);
        let hash = TxHash::repeat_byte(5);
        let first = TransactionRecord::new(hash, Address::ZERO, None, 20.0, 1_000, None);
        let retried = TransactionRecord::new(hash, Address::ZERO, None, 20.0, 9_000, None);

        assert_eq!(monitor.ingest(first), Admission::Inserted);
        assert_eq!(monitor.ingest(retried), Admission::Duplicate);

        let whales = monitor.whales();
        assert_eq!(whales.len(), 1);
        assert_eq!(whales[0].observed_at, 1_000);
        assert_eq!(monitor.stats().duplicates, 1);
        assert_eq!(monitor.stats().admitted, 1);
    }

    // ==================== Threshold tests ====================

    #[test]
    fn test_set_threshold_rejects_invalid_and_keeps_previous() {
        let monitor = monitor_with_price(2000.0);
        monitor.set_threshold(25.0).unwrap();

        assert!(matches!(monitor.set_threshold(-1.0), Err(ThresholdError::Negative(_))));
        assert!(matches!(monitor.set_threshold(f64::NAN), Err(ThresholdError::NotFinite)));
        assert_eq!(monitor.threshold().value(), 25.0);
    }

    #[test]
    fn test_set_threshold_clamped() {
        let monitor = monitor_with_price(2000.0);
        assert_eq!(monitor.set_threshold_clamped(-3.0).unwrap(), Threshold::ZERO);
        assert_eq!(monitor.threshold(), Threshold::ZERO);
        assert!(monitor.set_threshold_clamped(f64::INFINITY).is_err());
        assert_eq!(monitor.threshold(), Threshold::ZERO);
    }

    #[test]
    fn test_threshold_change_does_not_mutate_records() {
        let monitor = monitor_with_price(2000.0);
        for (i, value) in [12.0, 40.0, 8.0].into_iter().enumerate() {
            monitor.ingest(record(i as u8, value));
        }

        monitor.set_threshold(100.0).unwrap();
        assert!(monitor.snapshot().is_waiting_for_whales());
        monitor.set_threshold(0.0).unwrap();
        assert_eq!(monitor.whales().len(), 3);
    }

    #[test]
    fn test_updates_bump_revision() {
        let monitor = monitor_with_price(2000.0);
        let updates = monitor.watch_updates();
        let start = *updates.borrow();

        monitor.ingest(record(1, 20.0));
        monitor.set_threshold(5.0).unwrap();
        assert_eq!(*updates.borrow(), start + 2);
    }

    // ==================== Writer tests ====================

    #[tokio::test]
    async fn test_writer_applies_events_in_order() {
        let monitor = monitor_with_price(2000.0);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(run_writer(monitor.state.clone(), rx, cancel.clone()));

        tx.send(MonitorEvent::Admitted(record(1, 30.0))).await.unwrap();
        tx.send(MonitorEvent::NewBlock(100)).await.unwrap();
        tx.send(MonitorEvent::NewBlock(99)).await.unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(monitor.whales().len(), 1);
        assert_eq!(monitor.block_height(), Some(100));
    }

    #[tokio::test]
    async fn test_writer_drops_events_after_cancel() {
        let monitor = monitor_with_price(2000.0);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        tx.send(MonitorEvent::Admitted(record(1, 30.0))).await.unwrap();
        cancel.cancel();
        run_writer(monitor.state.clone(), rx, cancel).await;

        assert!(monitor.whales().is_empty());
        assert_eq!(monitor.block_height(), None);
    }

    // ==================== Lifecycle tests ====================

    #[tokio::test]
    async fn test_start_fetches_price_without_node() {
        let mut monitor = monitor_with_price(2000.0);
        let mut updates = monitor.watch_updates();
        monitor.start().unwrap();
        assert!(monitor.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while monitor.price().is_none() {
                updates.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let formatter = monitor.formatter(Arc::new(FixedWidth(true)));
        assert_eq!(formatter.to_fiat(1.0, false).as_deref(), Some("$2,000"));
        assert_eq!(formatter.to_fiat(1.0, true).as_deref(), Some("$2,000.00"));

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut monitor = monitor_with_price(2000.0);
        monitor.start().unwrap();
        assert!(matches!(monitor.start(), Err(MonitorError::AlreadyRunning)));
        monitor.stop().await;

        // Restart after stop is allowed
        monitor.start().unwrap();
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let mut monitor = monitor_with_price(2000.0);
        monitor.stop().await;
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let mut monitor = monitor_with_price(2000.0);
        assert!(matches!(monitor.start(), Err(MonitorError::NoRuntime)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.node.url = "http://localhost:8545".to_string();
        let result = WhaleMonitor::with_price_source(config, Arc::new(MockPriceSource::new()));
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_rows_follow_whale_view() {
        let monitor = monitor_with_price(2000.0);
        monitor.prices().store(PriceQuote::new(2000.0, 0));
        monitor.ingest(record(1, 15.0));
        monitor.ingest(record(2, 3.0));

        let formatter = monitor.formatter(Arc::new(FixedWidth(false)));
        let rows = monitor.rows(&formatter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].usd.as_deref(), Some("$30,000"));
    }
}
