//! Display Formatting
//!
//! Turns records into display strings: USD amounts at the cached ETH price and
//! shortened addresses. Whether the rendering surface is wide is decided by the
//! presentation layer and injected through [`DisplayWidth`].

use alloy::primitives::Address;
use serde::Serialize;
use std::sync::Arc;

use crate::price::PriceCache;
use crate::record::TransactionRecord;

/// Minimum surface width (in pixels) considered wide
pub const WIDE_SURFACE_MIN_WIDTH: u32 = 768;

/// Characters kept by the short address form
const SHORT_ADDRESS_LEN: usize = 6;

/// Characters kept on each side by the wide address form
const WIDE_ADDRESS_EDGE: usize = 5;

/// Tells the formatter whether the rendering surface is wide
pub trait DisplayWidth: Send + Sync {
    fn is_wide(&self) -> bool;
}

/// Width decision fixed up front
#[derive(Debug, Clone, Copy)]
pub struct FixedWidth(pub bool);

impl DisplayWidth for FixedWidth {
    fn is_wide(&self) -> bool {
        self.0
    }
}

/// Surface width in pixels
#[derive(Debug, Clone, Copy)]
pub struct SurfaceWidth(pub u32);

impl DisplayWidth for SurfaceWidth {
    fn is_wide(&self) -> bool {
        self.0 >= WIDE_SURFACE_MIN_WIDTH
    }
}

/// Format an amount as en-US dollars with thousands separators
///
/// Rounds half away from zero to `decimals` places, e.g. `$2,000` or `$2,000.00`.
pub fn format_usd(amount: f64, decimals: usize) -> String {
    let scale = 10f64.powi(decimals as i32);
    let rounded = (amount.abs() * scale).round() / scale;
    let fixed = format!("{:.*}", decimals, rounded);

    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && rounded > 0.0 { "-" } else { "" };
    match fraction {
        Some(fraction) => format!("{}${}.{}", sign, grouped, fraction),
        None => format!("{}${}", sign, grouped),
    }
}

/// Shorten an address or hash for display
///
/// Wide surfaces get `first5...last5`, everything else the first 6 characters.
pub fn shorten(value: &str, wide: bool) -> String {
    let chars: Vec<char> = value.chars().collect();
    if wide {
        if chars.len() <= WIDE_ADDRESS_EDGE * 2 {
            return value.to_string();
        }
        let head: String = chars[..WIDE_ADDRESS_EDGE].iter().collect();
        let tail: String = chars[chars.len() - WIDE_ADDRESS_EDGE..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        chars.iter().take(SHORT_ADDRESS_LEN).collect()
    }
}

/// Record prepared for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhaleRow {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Display value with symbol, e.g. `12.5Ξ`
    pub value: String,
    /// Whole-dollar value, None until a price is known
    pub usd: Option<String>,
    pub observed_at: u64,
    pub explorer_url: String,
}

/// Formatting façade over the price cache
#[derive(Clone)]
pub struct Formatter {
    prices: PriceCache,
    width: Arc<dyn DisplayWidth>,
}

impl Formatter {
    pub fn new(prices: PriceCache, width: Arc<dyn DisplayWidth>) -> Self {
        Self { prices, width }
    }

    /// Convert an ETH amount to dollars at the cached price
    ///
    /// # Arguments
    /// * `amount` - ETH amount
    /// * `precise` - 2 decimal places when true, whole dollars otherwise
    ///
    /// # Returns
    /// `None` until the first successful price refresh
    pub fn to_fiat(&self, amount: f64, precise: bool) -> Option<String> {
        let price = self.prices.usd()?;
        let decimals = if precise { 2 } else { 0 };
        Some(format_usd(amount * price, decimals))
    }

    /// Shorten an address string for display
    ///
    /// `shorten_always` forces the short form regardless of surface width.
    pub fn to_display_address(&self, address: &str, shorten_always: bool) -> String {
        let wide = !shorten_always && self.width.is_wide();
        shorten(address, wide)
    }

    /// Checksummed, shortened form of an address
    pub fn display_address(&self, address: &Address, shorten_always: bool) -> String {
        self.to_display_address(&address.to_checksum(None), shorten_always)
    }

    /// Prepare a record for display
    pub fn row(&self, record: &TransactionRecord) -> WhaleRow {
        WhaleRow {
            hash: self.to_display_address(&record.id(), true),
            from: self.display_address(&record.from, false),
            to: record
                .to
                .map(|to| self.display_address(&to, false))
                .unwrap_or_default(),
            value: record.value_label(),
            usd: self.to_fiat(record.display_value, false),
            observed_at: record.observed_at,
            explorer_url: record.explorer_url(),
        }
    }
}
