//! Transaction Store
//!
//! Deduplication and ranking of admitted transactions. The store has a single
//! writer (the monitor's event loop); readers go through snapshots taken by the
//! monitor.

use alloy::primitives::TxHash;
use std::collections::HashSet;
use tracing::debug;

use crate::filter::Threshold;
use crate::record::TransactionRecord;

/// Outcome of offering a record to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting, record was inserted into the ranked set
    Inserted,
    /// Identifier was already admitted, record dropped
    Duplicate,
    /// Value below the admission gate, record dropped
    BelowGate,
}

/// Set of transaction hashes already admitted
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<TxHash>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash`, returning true only the first time it is seen
    pub fn admit(&mut self, hash: TxHash) -> bool {
        self.seen.insert(hash)
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.seen.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Records sorted by display value, highest first
///
/// Records with equal display values keep their arrival order.
#[derive(Debug, Default)]
pub struct RankedSet {
    records: Vec<TransactionRecord>,
    max_records: Option<usize>,
}

impl RankedSet {
    /// Create an unbounded ranked set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ranked set holding at most `max_records` records
    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            records: Vec::new(),
            max_records: Some(max_records),
        }
    }

    /// Insert a record at its ranked position
    ///
    /// # Returns
    /// The lowest-ranked record if the insert pushed the set past its bound
    pub fn insert(&mut self, record: TransactionRecord) -> Option<TransactionRecord> {
        let position = self
            .records
            .partition_point(|r| r.display_value >= record.display_value);
        self.records.insert(position, record);

        match self.max_records {
            Some(max) if self.records.len() > max => self.records.pop(),
            _ => None,
        }
    }

    /// Records whose display value meets `threshold`, in ranked order
    ///
    /// The set is sorted descending, so the view is always a prefix.
    pub fn derive_view(&self, threshold: Threshold) -> Vec<TransactionRecord> {
        let end = self
            .records
            .partition_point(|r| r.display_value >= threshold.value());
        self.records[..end].to_vec()
    }

    /// All records in ranked order
    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Dedup store and ranked set behind one mutation point
#[derive(Debug, Default)]
pub struct TransactionBook {
    dedup: DedupStore,
    ranked: RankedSet,
}

impl TransactionBook {
    /// Create a book, optionally bounding the number of ranked records
    pub fn new(max_records: Option<usize>) -> Self {
        let ranked = match max_records {
            Some(max) => RankedSet::with_max_records(max),
            None => RankedSet::new(),
        };
        Self {
            dedup: DedupStore::new(),
            ranked,
        }
    }

    /// Admit a record unless its hash has been seen before
    ///
    /// Evicted hashes stay in the dedup store so they are never re-admitted.
    pub fn admit(&mut self, record: TransactionRecord) -> Admission {
        if !self.dedup.admit(record.hash) {
            debug!("Dropping duplicate transaction {:#x}", record.hash);
            return Admission::Duplicate;
        }

        if let Some(evicted) = self.ranked.insert(record) {
            debug!(
                "Evicted transaction {:#x} ({} ETH) to stay within bound",
                evicted.hash, evicted.display_value
            );
        }
        Admission::Inserted
    }

    /// Current whale view for `threshold`
    pub fn whales(&self, threshold: Threshold) -> Vec<TransactionRecord> {
        self.ranked.derive_view(threshold)
    }

    pub fn ranked(&self) -> &RankedSet {
        &self.ranked
    }

    pub fn seen(&self) -> usize {
        self.dedup.len()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}
