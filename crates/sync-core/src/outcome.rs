//! Per-cycle summary reported to the caller.

use std::fmt;

use crate::{RowKey, Watermark};

/// Rows of one batch that were marked failed, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub batch: usize,
    pub keys: Vec<RowKey>,
    pub reason: String,
}

/// Summary of one sync cycle. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Rows returned by change detection
    pub fetched: usize,
    /// Rows that received a vector
    pub embedded: usize,
    /// Rows written to the vector sink
    pub upserted: usize,
    /// Rows marked failed (embedding or upsert)
    pub failed: usize,
    /// Rows whose rendered text was empty; never sent to the provider
    pub skipped: usize,
    pub batches: usize,
    pub failures: Vec<BatchFailure>,
    /// Watermark loaded at the start of the cycle
    pub previous_watermark: Watermark,
    /// Watermark in force after the cycle
    pub watermark: Watermark,
    /// True when a cancellation request stopped the cycle before all changes were read
    pub interrupted: bool,
}

impl SyncOutcome {
    /// Outcome of a cycle that detected nothing.
    pub fn no_changes(watermark: Watermark) -> Self {
        Self {
            fetched: 0,
            embedded: 0,
            upserted: 0,
            failed: 0,
            skipped: 0,
            batches: 0,
            failures: Vec::new(),
            previous_watermark: watermark.clone(),
            watermark,
            interrupted: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }

    /// Every fetched row made it into the vector sink.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn advanced(&self) -> bool {
        self.watermark > self.previous_watermark
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes (watermark {})", self.watermark);
        }
        write!(
            f,
            "fetched={} embedded={} upserted={} failed={} batches={} watermark={}",
            self.fetched, self.embedded, self.upserted, self.failed, self.batches, self.watermark
        )?;
        if self.skipped > 0 {
            write!(f, " skipped={}", self.skipped)?;
        }
        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}
