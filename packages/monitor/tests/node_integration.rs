//! Anvil Integration Tests
//!
//! These tests require a running Anvil instance at ws://127.0.0.1:8545.
//! They are marked with #[ignore] by default for CI environments.
//!
//! To run these tests:
//! 1. Start Anvil: `anvil --block-time 1`
//! 2. Run tests: `cargo test --test node_integration -- --ignored`

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;

use whalewatch_monitor::filter::AdmissionGate;
use whalewatch_monitor::node::{NodeClient, NodeConnection};
use whalewatch_monitor::price::{PriceError, PriceSource};
use whalewatch_monitor::stats::MonitorStats;
use whalewatch_monitor::subscriber::{resolve_notification, Notification};
use whalewatch_monitor::{ConnectionStatus, MonitorConfig, WhaleMonitor};

const ANVIL_WS_URL: &str = "ws://127.0.0.1:8545";
const ANVIL_ADDR: &str = "127.0.0.1:8545";

/// Check if test infrastructure is available
fn infra_available() -> bool {
    ANVIL_ADDR
        .parse::<SocketAddr>()
        .map(|addr| TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok())
        .unwrap_or(false)
}

struct StaticPrice;

#[async_trait::async_trait]
impl PriceSource for StaticPrice {
    async fn fetch_usd_price(&self) -> Result<f64, PriceError> {
        Ok(2000.0)
    }
}

// ==================== Connection Tests ====================

#[tokio::test]
#[ignore = "Requires running Anvil at ws://127.0.0.1:8545"]
async fn test_connect_to_anvil_ws() {
    if !infra_available() {
        eprintln!("Skipping test: Anvil not available at {}", ANVIL_WS_URL);
        return;
    }

    let mut conn = NodeConnection::with_url(ANVIL_WS_URL);
    let result = conn.connect().await;

    assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
    assert_eq!(conn.reconnect_attempts(), 0);
}

#[tokio::test]
#[ignore = "Requires running Anvil at ws://127.0.0.1:8545"]
async fn test_block_number_from_anvil() {
    if !infra_available() {
        return;
    }

    let provider = NodeConnection::with_url(ANVIL_WS_URL).connect().await.unwrap();
    let height = provider.block_number().await;

    assert!(height.is_ok(), "Failed to read block number: {:?}", height.err());
}

#[tokio::test]
#[ignore = "Requires running Anvil at ws://127.0.0.1:8545"]
async fn test_unknown_transaction_resolves_to_none() {
    if !infra_available() {
        return;
    }

    let provider = NodeConnection::with_url(ANVIL_WS_URL).connect().await.unwrap();
    let stats = MonitorStats::new();
    let notification = Notification {
        tx_hash: TxHash::repeat_byte(0x42),
        block_number: None,
    };

    let gate = AdmissionGate::new(0.0);
    let record = resolve_notification(&provider, notification, gate, &stats).await;

    assert!(record.is_none());
    assert_eq!(stats.snapshot().resolution_misses, 1);
}

// ==================== Monitor Tests ====================

#[tokio::test]
#[ignore = "Requires running Anvil at ws://127.0.0.1:8545"]
async fn test_monitor_connects_and_tracks_height() {
    if !infra_available() {
        return;
    }

    let config = MonitorConfig::with_node_url(ANVIL_WS_URL);
    let mut monitor = WhaleMonitor::with_price_source(config, Arc::new(StaticPrice)).unwrap();
    let mut status = monitor.watch_status();
    monitor.start().unwrap();

    let connected = status.wait_for(|s| *s == ConnectionStatus::Connected);
    tokio::time::timeout(Duration::from_secs(5), connected)
        .await
        .expect("timed out waiting for connection")
        .unwrap();

    // Anvil with --block-time 1 mines a block every second
    let mut updates = monitor.watch_updates();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.block_height().is_none() {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    monitor.stop().await;
    assert_eq!(monitor.status(), ConnectionStatus::Disconnected);
    assert!(monitor.price().is_some());
}
