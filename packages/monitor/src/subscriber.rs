//! Event Subscriber
//!
//! Streams transaction notifications from the node, resolves each one into a
//! full transaction and forwards records that clear the admission gate to the
//! monitor's writer. Every session also follows new block headers to report the
//! chain height and trigger price refreshes.
//!
//! Two modes are supported:
//! - pending transactions (`newPendingTransactions`)
//! - ERC-20 `Transfer` logs, resolved through the log's transaction hash

use alloy::primitives::{keccak256, TxHash, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::Filter;
use futures_util::stream::{BoxStream, StreamExt};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::filter::AdmissionGate;
use crate::node::{ConnectionStatus, NodeClient, NodeConfig, NodeConnection, NodeError};
use crate::record::TransactionRecord;
use crate::stats::MonitorStats;

/// Canonical ERC-20 transfer event signature
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// Default cap on concurrent transaction lookups per session
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Topic hash of [`TRANSFER_EVENT_SIGNATURE`]
pub fn transfer_topic() -> B256 {
    keccak256(TRANSFER_EVENT_SIGNATURE)
}

/// What the subscriber listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    /// Unconfirmed transactions from the node's mempool
    #[default]
    PendingTransactions,
    /// Mined ERC-20 transfer events
    TransferLogs,
}

/// Subscription mode name that is neither `pending` nor `logs`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown subscription mode: {0:?}")]
pub struct UnknownModeError(pub String);

impl FromStr for SubscriptionMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "pending-transactions" => Ok(SubscriptionMode::PendingTransactions),
            "logs" | "transfer-logs" => Ok(SubscriptionMode::TransferLogs),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionMode::PendingTransactions => f.write_str("pending"),
            SubscriptionMode::TransferLogs => f.write_str("logs"),
        }
    }
}

/// A transaction the node told us about, not yet resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub tx_hash: TxHash,
    /// Present for log events
    pub block_number: Option<u64>,
}

/// Input to the monitor's single writer
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Resolved transaction that cleared the admission gate
    Admitted(TransactionRecord),
    /// Chain height after a new block
    NewBlock(u64),
}

/// Resolve a notification into a record
///
/// # Returns
/// `None` if the node no longer knows the transaction, the lookup failed, or the
/// value is below the admission gate. None of these are errors for the caller.
pub async fn resolve_notification<C>(
    client: &C,
    notification: Notification,
    gate: AdmissionGate,
    stats: &MonitorStats,
) -> Option<TransactionRecord>
where
    C: NodeClient + ?Sized,
{
    let tx = match client.transaction_by_hash(notification.tx_hash).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            MonitorStats::bump(&stats.resolution_misses);
            debug!("Transaction {:#x} not found, skipping", notification.tx_hash);
            return None;
        }
        Err(e) => {
            MonitorStats::bump(&stats.resolution_errors);
            debug!("Failed to resolve {:#x}: {}", notification.tx_hash, e);
            return None;
        }
    };

    let record = TransactionRecord::from_node(&tx, notification.block_number);
    if !gate.allows(record.value) {
        MonitorStats::bump(&stats.gate_rejections);
        return None;
    }

    Some(record)
}

enum SessionEnd {
    Cancelled,
    StreamClosed,
}

type NotificationStream = BoxStream<'static, Notification>;
type HeadStream = BoxStream<'static, u64>;

/// Long-lived subscription task feeding the monitor
pub struct Subscriber {
    config: NodeConfig,
    mode: SubscriptionMode,
    gate: AdmissionGate,
    events: mpsc::Sender<MonitorEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    block_signal: Arc<Notify>,
    stats: Arc<MonitorStats>,
    max_in_flight: usize,
}

impl Subscriber {
    pub fn new(
        config: NodeConfig,
        mode: SubscriptionMode,
        gate: AdmissionGate,
        events: mpsc::Sender<MonitorEvent>,
        status: Arc<watch::Sender<ConnectionStatus>>,
        block_signal: Arc<Notify>,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            config,
            mode,
            gate,
            events,
            status,
            block_signal,
            stats,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Limit concurrent transaction lookups
    ///
    /// Once the limit is reached, notifications are left queued on the
    /// subscription until a lookup finishes.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    /// Run until cancelled or until reconnection gives up
    ///
    /// Lost sessions are re-established with backoff. Events missed while
    /// disconnected are not replayed.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), NodeError> {
        let mut connection = NodeConnection::new(self.config.clone());
        let mut in_flight = JoinSet::new();
        let mut first_attempt = true;

        let result = loop {
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                connected = self.connect(&mut connection, first_attempt) => connected,
            };
            first_attempt = false;

            let provider = match connected {
                Ok(provider) => provider,
                Err(e) => {
                    error!("Giving up on node connection: {}", e);
                    break Err(e);
                }
            };

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                opened = self.open_streams(&provider) => opened,
            };

            // Backoff keeps growing until a session is actually established
            match opened {
                Ok(streams) => {
                    connection.reset_reconnect_counter();
                    match self.run_session(&provider, streams, &mut in_flight, &cancel).await {
                        SessionEnd::Cancelled => break Ok(()),
                        SessionEnd::StreamClosed => warn!("Subscription stream closed"),
                    }
                }
                Err(e) => warn!("Subscription failed: {}", e),
            }

            self.set_status(ConnectionStatus::Disconnected);
            MonitorStats::bump(&self.stats.reconnects);
        };

        in_flight.abort_all();
        self.set_status(ConnectionStatus::Disconnected);
        info!("Subscriber stopped");
        result
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!("Connection status {} -> {}", previous, status);
        }
    }

    async fn connect(
        &self,
        connection: &mut NodeConnection,
        first_attempt: bool,
    ) -> Result<RootProvider<PubSubFrontend>, NodeError> {
        if first_attempt {
            self.set_status(ConnectionStatus::Connecting);
            match connection.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => warn!("Initial connection failed: {}", e),
            }
        }

        self.set_status(ConnectionStatus::Reconnecting);
        connection.reconnect().await
    }

    async fn open_streams(
        &self,
        provider: &RootProvider<PubSubFrontend>,
    ) -> Result<(NotificationStream, HeadStream), NodeError> {
        let notifications = match self.mode {
            SubscriptionMode::PendingTransactions => provider
                .subscribe_pending_transactions()
                .await
                .map_err(|e| NodeError::SubscriptionFailed(e.to_string()))?
                .into_stream()
                .map(|tx_hash| Notification {
                    tx_hash,
                    block_number: None,
                })
                .boxed(),
            SubscriptionMode::TransferLogs => {
                let filter = Filter::new().event_signature(transfer_topic());
                provider
                    .subscribe_logs(&filter)
                    .await
                    .map_err(|e| NodeError::SubscriptionFailed(e.to_string()))?
                    .into_stream()
                    .filter_map(|log| async move {
                        log.transaction_hash.map(|tx_hash| Notification {
                            tx_hash,
                            block_number: log.block_number,
                        })
                    })
                    .boxed()
            }
        };

        let heads = provider
            .subscribe_blocks()
            .await
            .map_err(|e| NodeError::SubscriptionFailed(e.to_string()))?
            .into_stream()
            .map(|header| header.number)
            .boxed();

        Ok((notifications, heads))
    }

    async fn run_session(
        &self,
        provider: &RootProvider<PubSubFrontend>,
        (mut notifications, mut heads): (NotificationStream, HeadStream),
        in_flight: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        self.set_status(ConnectionStatus::Connected);
        info!("Subscribed to {} notifications and new blocks", self.mode);

        // Heads only arrive with the next block, so read the current height now
        self.spawn_block_lookup(provider, in_flight);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                notification = notifications.next(), if in_flight.len() < self.max_in_flight => {
                    match notification {
                        Some(notification) => {
                            MonitorStats::bump(&self.stats.notifications);
                            self.spawn_resolution(provider, notification, in_flight);
                        }
                        None => return SessionEnd::StreamClosed,
                    }
                }
                head = heads.next() => match head {
                    Some(number) => {
                        MonitorStats::bump(&self.stats.blocks);
                        self.block_signal.notify_one();
                        self.report_height(number);
                    }
                    None => return SessionEnd::StreamClosed,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Resolution task panicked: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn spawn_resolution(
        &self,
        provider: &RootProvider<PubSubFrontend>,
        notification: Notification,
        in_flight: &mut JoinSet<()>,
    ) {
        let client = provider.clone();
        let gate = self.gate;
        let events = self.events.clone();
        let stats = self.stats.clone();

        in_flight.spawn(async move {
            if let Some(record) = resolve_notification(&client, notification, gate, &stats).await {
                // Writer gone means the monitor is shutting down
                let _ = events.send(MonitorEvent::Admitted(record)).await;
            }
        });
    }

    fn report_height(&self, number: u64) {
        // Heights are latest-wins, a dropped one is replaced by the next block
        if let Err(TrySendError::Full(_)) = self.events.try_send(MonitorEvent::NewBlock(number)) {
            debug!("Writer busy, skipping height {}", number);
        }
    }

    fn spawn_block_lookup(
        &self,
        provider: &RootProvider<PubSubFrontend>,
        in_flight: &mut JoinSet<()>,
    ) {
        let client = provider.clone();
        let events = self.events.clone();

        in_flight.spawn(async move {
            match client.block_number().await {
                Ok(height) => {
                    let _ = events.send(MonitorEvent::NewBlock(height)).await;
                }
                Err(e) => debug!("Failed to read block number: {}", e),
            }
        });
    }
}
