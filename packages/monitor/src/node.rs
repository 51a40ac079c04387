//! Node Connection
//!
//! Connects to an Ethereum node over WebSocket or a Unix IPC socket, resolves
//! transactions by hash and handles reconnection with exponential backoff.

use alloy::primitives::TxHash;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::transports::ipc::IpcConnect;
use alloy::transports::ws::WsConnect;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::record::NodeTransaction;

/// Default node endpoint
pub const DEFAULT_NODE_URL: &str = "ws://127.0.0.1:8546";

/// Well-known IPC socket paths
pub const DEFAULT_IPC_PATHS: &[&str] = &[
    "/tmp/anvil.ipc",
    "~/.foundry/anvil.ipc",
    "/var/run/geth.ipc",
    "~/.ethereum/geth.ipc",
];

/// Maximum number of reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Connection timeout in milliseconds
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur while talking to the node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    #[error("Invalid node endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Subscription state reported to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Transport used to reach the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEndpoint {
    /// `ws://` or `wss://` URL
    Ws(String),
    /// Filesystem path to an IPC socket, `~` already expanded
    Ipc(String),
}

impl NodeEndpoint {
    /// Infer the transport from a URL or path
    ///
    /// HTTP endpoints are rejected since they cannot carry subscriptions.
    pub fn parse(url: &str) -> Result<Self, NodeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(NodeError::InvalidEndpoint("Endpoint cannot be empty".to_string()));
        }

        if url.starts_with("ws://") || url.starts_with("wss://") {
            return Ok(NodeEndpoint::Ws(url.to_string()));
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(NodeError::InvalidEndpoint(format!(
                "{} does not support subscriptions, use ws:// or an IPC path",
                url
            )));
        }

        let expanded = expand_path(url);
        let looks_like_socket = expanded.ends_with(".ipc")
            || expanded.contains("geth")
            || expanded.contains("anvil");
        if !looks_like_socket {
            warn!("IPC path '{}' may not be a valid socket path", url);
        }
        Ok(NodeEndpoint::Ipc(expanded))
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEndpoint::Ws(url) => write!(f, "{}", url),
            NodeEndpoint::Ipc(path) => write!(f, "ipc:{}", path),
        }
    }
}

/// Configuration for the node connection
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// WebSocket URL or IPC socket path
    pub url: String,
    /// Maximum consecutive reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NODE_URL.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: CONNECTION_TIMEOUT_MS,
        }
    }
}

impl NodeConfig {
    /// Create a new config with the specified endpoint
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Find the first existing socket among `candidates`, `~` expanded
pub fn find_ipc_socket_in(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|path| socket_exists(path))
        .map(|path| expand_path(path))
}

/// Read access to the chain needed by the monitor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Look up a transaction; `Ok(None)` when the node no longer knows it
    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<NodeTransaction>, NodeError>;

    /// Current chain height
    async fn block_number(&self) -> Result<u64, NodeError>;
}

#[async_trait]
impl NodeClient for RootProvider<PubSubFrontend> {
    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<NodeTransaction>, NodeError> {
        self.raw_request("eth_getTransactionByHash".into(), (hash,))
            .await
            .map_err(|e| NodeError::Rpc(e.to_string()))
    }

    async fn block_number(&self) -> Result<u64, NodeError> {
        self.get_block_number()
            .await
            .map_err(|e| NodeError::Rpc(e.to_string()))
    }
}

/// Node connection manager with reconnection support
pub struct NodeConnection {
    config: NodeConfig,
    reconnect_attempts: u32,
}

impl NodeConnection {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            reconnect_attempts: 0,
        }
    }

    /// Create with a specific endpoint and default settings
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(NodeConfig::with_url(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Reset reconnection counter
    pub fn reset_reconnect_counter(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Get current reconnection attempt count
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Attempt to connect to the node
    ///
    /// Returns a pub/sub capable provider
    pub async fn connect(&mut self) -> Result<RootProvider<PubSubFrontend>, NodeError> {
        let endpoint = NodeEndpoint::parse(&self.config.url)?;

        if let NodeEndpoint::Ipc(path) = &endpoint {
            if !Path::new(path).exists() {
                return Err(NodeError::SocketNotFound(path.clone()));
            }
        }

        info!("Connecting to node at {}", endpoint);

        let connecting = async {
            match &endpoint {
                NodeEndpoint::Ws(url) => {
                    ProviderBuilder::new().on_ws(WsConnect::new(url.clone())).await
                }
                NodeEndpoint::Ipc(path) => {
                    let ipc: IpcConnect<String> = IpcConnect::new(path.clone());
                    ProviderBuilder::new().on_ipc(ipc).await
                }
            }
        };

        let provider = timeout(Duration::from_millis(self.config.timeout_ms), connecting)
            .await
            .map_err(|_| NodeError::Timeout(self.config.timeout_ms))?
            .map_err(|e| NodeError::ConnectionFailed(e.to_string()))?;

        info!("Successfully connected to node");

        Ok(provider)
    }

    /// Attempt to reconnect with exponential backoff
    ///
    /// Returns a provider if successful, or an error if max attempts exceeded
    pub async fn reconnect(&mut self) -> Result<RootProvider<PubSubFrontend>, NodeError> {
        while self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.next_backoff_delay();
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );

            sleep(delay).await;
            self.reconnect_attempts += 1;

            match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", self.reconnect_attempts, e);
                }
            }
        }

        Err(NodeError::MaxReconnectAttemptsExceeded(self.config.max_reconnect_attempts))
    }
}
