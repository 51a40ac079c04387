//! Monitor Configuration
//!
//! Defaults live next to the component they configure; this module bundles
//! them and reads overrides from the environment.

use std::time::Duration;
use thiserror::Error;

use crate::filter::{AdmissionGate, Threshold, ThresholdError, DEFAULT_MIN_ADMISSION_ETH};
use crate::node::{find_ipc_socket_in, NodeConfig, NodeEndpoint, NodeError, DEFAULT_IPC_PATHS};
use crate::price::PriceConfig;
use crate::subscriber::{SubscriptionMode, UnknownModeError};

/// Capacity of the channel between resolution tasks and the writer
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

pub const ENV_NODE_URL: &str = "WHALEWATCH_NODE_URL";
pub const ENV_MODE: &str = "WHALEWATCH_MODE";
pub const ENV_PRICE_URL: &str = "WHALEWATCH_PRICE_URL";
pub const ENV_PRICE_INTERVAL_SECS: &str = "WHALEWATCH_PRICE_INTERVAL_SECS";
pub const ENV_MIN_ADMISSION: &str = "WHALEWATCH_MIN_ADMISSION";
pub const ENV_THRESHOLD: &str = "WHALEWATCH_THRESHOLD";
pub const ENV_MAX_RECORDS: &str = "WHALEWATCH_MAX_RECORDS";

/// Errors in monitor configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid node endpoint: {0}")]
    Endpoint(#[from] NodeError),

    #[error("Invalid threshold: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("Invalid WHALEWATCH_MODE: {0}")]
    Mode(#[from] UnknownModeError),
}

/// Everything needed to build a [`crate::WhaleMonitor`]
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Node connection settings
    pub node: NodeConfig,
    /// Pending transactions or transfer logs
    pub mode: SubscriptionMode,
    /// Price source settings
    pub price: PriceConfig,
    /// Minimum ETH value a transaction needs to be stored
    pub min_admission_eth: f64,
    /// Initial whale threshold
    pub threshold: Threshold,
    /// Optional bound on stored records, unbounded when None
    pub max_records: Option<usize>,
    /// Capacity of the writer's event channel
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            mode: SubscriptionMode::default(),
            price: PriceConfig::default(),
            min_admission_eth: DEFAULT_MIN_ADMISSION_ETH,
            threshold: Threshold::default(),
            max_records: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl MonitorConfig {
    /// Default config for a given node endpoint
    pub fn with_node_url(url: impl Into<String>) -> Self {
        Self {
            node: NodeConfig::with_url(url),
            ..Default::default()
        }
    }

    /// Load overrides from `WHALEWATCH_*` environment variables
    ///
    /// Without `WHALEWATCH_NODE_URL`, the first local node socket found at a
    /// well-known path is used, then the default WebSocket endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup_with_sockets(|key| std::env::var(key).ok(), DEFAULT_IPC_PATHS)
    }

    /// Load overrides through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_with_sockets(lookup, &[])
    }

    /// Like [`MonitorConfig::from_lookup`], probing `ipc_paths` when no node
    /// endpoint is configured
    pub fn from_lookup_with_sockets<F>(lookup: F, ipc_paths: &[&str]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup(ENV_NODE_URL) {
            Some(url) => config.node.url = url,
            None => {
                if let Some(path) = find_ipc_socket_in(ipc_paths) {
                    config.node.url = path;
                }
            }
        }
        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = mode.parse()?;
        }
        if let Some(url) = lookup(ENV_PRICE_URL) {
            config.price.url = url;
        }
        if let Some(secs) = lookup(ENV_PRICE_INTERVAL_SECS) {
            let secs: u64 = parse_value(ENV_PRICE_INTERVAL_SECS, &secs)?;
            config.price.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(min) = lookup(ENV_MIN_ADMISSION) {
            config.min_admission_eth = parse_value(ENV_MIN_ADMISSION, &min)?;
        }
        if let Some(threshold) = lookup(ENV_THRESHOLD) {
            config.threshold = threshold.parse()?;
        }
        if let Some(max) = lookup(ENV_MAX_RECORDS) {
            config.max_records = Some(parse_value(ENV_MAX_RECORDS, &max)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail only once the monitor runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        NodeEndpoint::parse(&self.node.url)?;

        if !self.min_admission_eth.is_finite() || self.min_admission_eth < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_MIN_ADMISSION,
                value: self.min_admission_eth.to_string(),
            });
        }
        if self.price.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: ENV_PRICE_INTERVAL_SECS,
                value: "0".to_string(),
            });
        }
        if self.max_records == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: ENV_MAX_RECORDS,
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Admission gate for this config
    pub fn admission_gate(&self) -> AdmissionGate {
        AdmissionGate::new(self.min_admission_eth)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
