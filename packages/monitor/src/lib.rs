//! WhaleWatch Monitor Library
//!
//! This crate watches an Ethereum node for high-value ("whale") transactions,
//! keeps them ranked by value, tracks the ETH/USD price and the chain height,
//! and exposes a consistent snapshot for a presentation layer to render.

pub mod config;
pub mod filter;
pub mod format;
pub mod logging;
pub mod monitor;
pub mod node;
pub mod price;
pub mod record;
pub mod stats;
pub mod store;
pub mod subscriber;

// Re-export commonly used types
pub use config::{ConfigError, MonitorConfig};
pub use filter::{AdmissionGate, Threshold, ThresholdError};
pub use format::{DisplayWidth, FixedWidth, Formatter, SurfaceWidth, WhaleRow};
pub use logging::init_logging;
pub use monitor::{MonitorError, MonitorSnapshot, WhaleMonitor};
pub use node::{ConnectionStatus, NodeConfig, NodeError};
pub use price::{HttpPriceSource, PriceCache, PriceError, PriceQuote, PriceSource};
pub use record::TransactionRecord;
pub use stats::StatsSnapshot;
pub use store::{Admission, TransactionBook};
pub use subscriber::SubscriptionMode;
