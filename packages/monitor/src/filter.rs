//! Value Filtering
//!
//! Two value filters sit on the transaction path. The admission gate is fixed
//! when the monitor is built and bounds what is stored at all. The threshold is
//! user-controlled and only shapes the derived whale view.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::record::TransactionRecord;

/// Default minimum value in ETH a transaction needs to be stored
pub const DEFAULT_MIN_ADMISSION_ETH: f64 = 10.0;

/// Default whale threshold in ETH
pub const DEFAULT_THRESHOLD_ETH: f64 = 10.0;

/// Errors for threshold input coming from the control surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Threshold must be non-negative, got {0}")]
    Negative(f64),

    #[error("Threshold must be a finite number")]
    NotFinite,

    #[error("Invalid threshold: {0:?}")]
    Unparsable(String),
}

/// Fixed pre-filter applied to resolved transactions before deduplication
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionGate {
    min_value: f64,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ADMISSION_ETH)
    }
}

impl AdmissionGate {
    /// Create a gate admitting values at or above `min_value` ETH
    ///
    /// Negative or non-finite minimums are treated as zero.
    pub fn new(min_value: f64) -> Self {
        let min_value = if min_value.is_finite() { min_value.max(0.0) } else { 0.0 };
        Self { min_value }
    }

    /// Minimum admitted value in ETH
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    /// Check whether a raw ETH value passes the gate
    pub fn allows(&self, value: f64) -> bool {
        value >= self.min_value
    }
}

/// User-controlled whale threshold in ETH, always finite and non-negative
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Threshold(f64);

impl Threshold {
    pub const ZERO: Threshold = Threshold(0.0);

    /// Validate a threshold, rejecting negative and non-finite values
    pub fn new(value: f64) -> Result<Self, ThresholdError> {
        if !value.is_finite() {
            return Err(ThresholdError::NotFinite);
        }
        if value < 0.0 {
            return Err(ThresholdError::Negative(value));
        }
        // Normalizes -0.0
        Ok(Self(value + 0.0))
    }

    /// Like [`Threshold::new`], but clamps negative values to zero
    pub fn clamped(value: f64) -> Result<Self, ThresholdError> {
        if !value.is_finite() {
            return Err(ThresholdError::NotFinite);
        }
        Ok(Self(value.max(0.0) + 0.0))
    }

    /// Threshold value in ETH
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Check whether a record belongs in the whale view
    pub fn admits(&self, record: &TransactionRecord) -> bool {
        record.display_value >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD_ETH)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| ThresholdError::Unparsable(s.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<f64> for Threshold {
    type Error = ThresholdError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for f64 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}
