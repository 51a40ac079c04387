//! Transaction Records
//!
//! Converts transactions resolved from the node into the records the monitor
//! stores and ranks. Values are carried in ETH with a 2-decimal display value
//! used for ranking and threshold comparisons.

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Block explorer used for transaction links
pub const EXPLORER_TX_URL: &str = "https://etherscan.io/tx/";

/// Symbol appended to native-asset amounts
pub const NATIVE_SYMBOL: &str = "Ξ";

/// Transaction as returned by `eth_getTransactionByHash`
///
/// Only the fields the monitor needs are deserialized; everything else in the
/// RPC payload is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Sender address
    pub from: Address,
    /// Recipient address (None for contract creation)
    #[serde(default)]
    pub to: Option<Address>,
    /// Transferred value in wei
    pub value: U256,
}

/// A resolved transaction admitted by the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Transaction hash, unique per record
    pub hash: TxHash,
    /// Sender address
    pub from: Address,
    /// Recipient address, None for contract creation
    pub to: Option<Address>,
    /// Value in ETH
    pub value: f64,
    /// Value rounded to 2 decimal places
    pub display_value: f64,
    /// Unix timestamp in milliseconds when the transaction was resolved
    pub observed_at: u64,
    /// Block the transaction was mined in, known only for log events
    pub block_number: Option<u64>,
}

impl TransactionRecord {
    /// Build a record, deriving the display value from `value`
    pub fn new(
        hash: TxHash,
        from: Address,
        to: Option<Address>,
        value: f64,
        observed_at: u64,
        block_number: Option<u64>,
    ) -> Self {
        Self {
            hash,
            from,
            to,
            value,
            display_value: round_display_value(value),
            observed_at,
            block_number,
        }
    }

    /// Build a record from a node transaction, stamped with the current time
    pub fn from_node(tx: &NodeTransaction, block_number: Option<u64>) -> Self {
        Self::new(
            tx.hash,
            tx.from,
            tx.to,
            wei_to_eth(tx.value),
            current_timestamp_millis(),
            block_number,
        )
    }

    /// Transaction hash as a 0x-prefixed hex string
    pub fn id(&self) -> String {
        format!("{:#x}", self.hash)
    }

    /// Link to the transaction on the block explorer
    pub fn explorer_url(&self) -> String {
        format!("{}{:#x}", EXPLORER_TX_URL, self.hash)
    }

    /// Display value with the native symbol, e.g. `12.5Ξ`
    pub fn value_label(&self) -> String {
        format!("{}{}", self.display_value, NATIVE_SYMBOL)
    }
}

/// Convert a wei amount to ETH
pub fn wei_to_eth(value: U256) -> f64 {
    format_ether(value).parse().unwrap_or(0.0)
}

/// Round a value to 2 decimal places
pub fn round_display_value(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const ONE_ETH: u128 = 1_000_000_000_000_000_000;

    fn node_tx(value: U256) -> NodeTransaction {
        NodeTransaction {
            hash: TxHash::repeat_byte(0xab),
            from: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            to: Some(address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D")),
            value,
        }
    }

    // ==================== wei_to_eth tests ====================

    #[test]
    fn test_wei_to_eth_one_ether() {
        assert_eq!(wei_to_eth(U256::from(ONE_ETH)), 1.0);
    }

    #[test]
    fn test_wei_to_eth_zero() {
        assert_eq!(wei_to_eth(U256::ZERO), 0.0);
    }

    #[test]
    fn test_wei_to_eth_fractional() {
        let value = U256::from(ONE_ETH / 10);
        assert!((wei_to_eth(value) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_wei_to_eth_large_value() {
        let value = U256::from(ONE_ETH) * U256::from(4_000u64);
        assert_eq!(wei_to_eth(value), 4_000.0);
    }

    // ==================== round_display_value tests ====================

    #[test]
    fn test_round_display_value_two_places() {
        assert_eq!(round_display_value(12.3456), 12.35);
        assert_eq!(round_display_value(12.344), 12.34);
    }

    #[test]
    fn test_round_display_value_whole_number() {
        assert_eq!(round_display_value(15.0), 15.0);
    }

    // ==================== TransactionRecord tests ====================

    #[test]
    fn test_record_from_node_transaction() {
        let tx = node_tx(U256::from(ONE_ETH) * U256::from(15u64));
        let record = TransactionRecord::from_node(&tx, Some(19_000_000));

        assert_eq!(record.hash, tx.hash);
        assert_eq!(record.from, tx.from);
        assert_eq!(record.to, tx.to);
        assert_eq!(record.value, 15.0);
        assert_eq!(record.display_value, 15.0);
        assert_eq!(record.block_number, Some(19_000_000));
        assert!(record.observed_at > 0);
    }

    #[test]
    fn test_record_display_value_is_rounded() {
        let record = TransactionRecord::new(
            TxHash::ZERO,
            Address::ZERO,
            None,
            10.129,
            0,
            None,
        );
        assert_eq!(record.value, 10.129);
        assert_eq!(record.display_value, 10.13);
    }

    #[test]
    fn test_record_id_is_prefixed_hex() {
        let hash = TxHash::repeat_byte(0x11);
        let record = TransactionRecord::new(hash, Address::ZERO, None, 1.0, 0, None);
        assert!(record.id().starts_with("0x"));
        assert_eq!(record.id().len(), 66);
    }

    #[test]
    fn test_record_explorer_url() {
        let hash = TxHash::repeat_byte(0x11);
        let record = TransactionRecord::new(hash, Address::ZERO, None, 1.0, 0, None);
        assert_eq!(
            record.explorer_url(),
            format!("https://etherscan.io/tx/0x{}", "11".repeat(32))
        );
    }

    #[test]
    fn test_record_value_label() {
        let record = TransactionRecord::new(TxHash::ZERO, Address::ZERO, None, 12.5, 0, None);
        assert_eq!(record.value_label(), "12.5Ξ");

        let record = TransactionRecord::new(TxHash::ZERO, Address::ZERO, None, 15.0, 0, None);
        assert_eq!(record.value_label(), "15Ξ");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = TransactionRecord::new(TxHash::ZERO, Address::ZERO, None, 1.0, 42, Some(7));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"displayValue\""));
        assert!(json.contains("\"observedAt\""));
        assert!(json.contains("\"blockNumber\""));
    }

    // ==================== NodeTransaction tests ====================

    #[test]
    fn test_node_transaction_from_rpc_json() {
        let json = r#"{
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "to": "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
            "value": "0xde0b6b3a7640000",
            "nonce": "0x1",
            "gas": "0x5208",
            "input": "0x"
        }"#;

        let tx: NodeTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.hash, TxHash::repeat_byte(0x11));
        assert_eq!(tx.value, U256::from(ONE_ETH));
        assert!(tx.to.is_some());
    }

    #[test]
    fn test_node_transaction_contract_creation_has_no_recipient() {
        let json = r#"{
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "to": null,
            "value": "0x0"
        }"#;

        let tx: NodeTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.to, None);
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2023-01-01 in milliseconds
        assert!(current_timestamp_millis() > 1_672_531_200_000);
    }
}
