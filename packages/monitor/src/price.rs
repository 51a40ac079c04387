//! Price Cache
//!
//! Keeps the latest USD quote for ETH. Quotes are fetched from a market-data
//! endpoint on a fixed interval and on every new block. A failed fetch leaves
//! the previous quote in place.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::record::current_timestamp_millis;

/// Default market-data endpoint for the ETH quote
pub const DEFAULT_PRICE_URL: &str = "https://data.messari.io/api/v1/assets/eth/metrics";

/// Default interval between scheduled refreshes
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;

/// Default HTTP timeout for a price fetch
pub const DEFAULT_PRICE_TIMEOUT_SECS: u64 = 10;

/// User agent sent with price requests
pub const DEFAULT_USER_AGENT: &str = "whalewatch-monitor/0.1";

/// Path of the USD price inside the market-data payload
const PRICE_FIELD_PATH: [&str; 3] = ["data", "market_data", "price_usd"];

/// Errors that can occur while fetching a price
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Price request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Price source returned status {0}")]
    Status(u16),

    #[error("Missing or non-numeric field: {0}")]
    MissingField(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(f64),
}

/// Latest USD price for one ETH
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// USD per ETH
    pub usd: f64,
    /// Unix timestamp in milliseconds of the successful fetch
    pub updated_at: u64,
}

impl PriceQuote {
    pub fn new(usd: f64, updated_at: u64) -> Self {
        Self { usd, updated_at }
    }

    /// Quote stamped with the current time
    pub fn now(usd: f64) -> Self {
        Self::new(usd, current_timestamp_millis())
    }

    /// Milliseconds since the quote was fetched
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }
}

/// Configuration for the price source
#[derive(Debug, Clone)]
pub struct PriceConfig {
    /// Market-data endpoint
    pub url: String,
    /// Interval between scheduled refreshes
    pub refresh_interval: Duration,
    /// HTTP timeout
    pub timeout: Duration,
    /// User agent header
    pub user_agent: String,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PRICE_URL.to_string(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_PRICE_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl PriceConfig {
    /// Default config pointed at a different endpoint
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Source of the current ETH price in USD
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_usd_price(&self) -> Result<f64, PriceError>;
}

/// Extract the USD price from a market-data payload
///
/// # Returns
/// The price if `data.market_data.price_usd` is a finite, non-negative number
pub fn parse_price_payload(body: &serde_json::Value) -> Result<f64, PriceError> {
    let field = PRICE_FIELD_PATH.iter().fold(body, |value, key| &value[*key]);
    let price = field
        .as_f64()
        .ok_or_else(|| PriceError::MissingField(PRICE_FIELD_PATH.join(".")))?;

    if !price.is_finite() || price < 0.0 {
        return Err(PriceError::InvalidPrice(price));
    }
    Ok(price)
}

/// Price source backed by an HTTP JSON endpoint
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceSource {
    pub fn new(config: &PriceConfig) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| PriceError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_usd_price(&self) -> Result<f64, PriceError> {
        let resp = self.client.get(&self.url).send().await?;

        if !resp.status().is_success() {
            return Err(PriceError::Status(resp.status().as_u16()));
        }

        let body: serde_json::Value = resp.json().await?;
        parse_price_payload(&body)
    }
}

/// Shared holder of the latest quote
///
/// Cloning is cheap; all clones see the same quote.
#[derive(Clone)]
pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    quote: Arc<RwLock<Option<PriceQuote>>>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            quote: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetch a fresh quote and replace the held one
    ///
    /// On failure the previous quote is retained and the error returned.
    pub async fn refresh(&self) -> Result<PriceQuote, PriceError> {
        let usd = self.source.fetch_usd_price().await?;
        let quote = PriceQuote::now(usd);
        self.store(quote);
        info!("Updated ETH price: ${}", usd);
        Ok(quote)
    }

    /// Replace the held quote
    pub fn store(&self, quote: PriceQuote) {
        *self.quote.write() = Some(quote);
    }

    /// Latest quote, if any fetch has succeeded
    pub fn current(&self) -> Option<PriceQuote> {
        *self.quote.read()
    }

    /// Latest USD price, if known
    pub fn usd(&self) -> Option<f64> {
        self.current().map(|q| q.usd)
    }
}

/// Refresh the cache every `period` and whenever `block_signal` fires
///
/// Runs until `cancel` is triggered. A fetch still in flight at cancellation is
/// dropped without touching the cache. `on_refresh` sees the outcome of every
/// completed fetch.
pub async fn run_price_poller<F>(
    cache: PriceCache,
    period: Duration,
    block_signal: Arc<Notify>,
    cancel: CancellationToken,
    on_refresh: F,
) where
    F: Fn(Result<&PriceQuote, &PriceError>) + Send + Sync,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => debug!("Scheduled price refresh"),
            _ = block_signal.notified() => debug!("New block, refreshing price"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = cache.refresh() => {
                if let Err(e) = &result {
                    warn!("Price refresh failed, keeping previous quote: {}", e);
                }
                on_refresh(result.as_ref());
            }
        }
    }

    info!("Price poller stopped");
}
