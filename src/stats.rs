use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Counts per failure category for one date, or merged across a run.
///
/// Flat so that it serializes to a single CSV row.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub date: Option<NaiveDate>,
    pub kind: Option<String>,

    // acquisition
    pub slices_attempted: usize,
    pub slices_missing: usize,
    pub fetch_failures: usize,

    // extraction
    pub parse_failures: usize,
    pub documents_skipped: usize,
    pub elements_skipped: usize,
    pub records_extracted: usize,

    // loading
    pub rows_loaded: u64,
    pub batches_rejected: usize,
    pub records_rejected: usize,

    // reconciliation
    pub unresolved_occurrences: u64,
    pub unresolved_distinct: usize,

    // worker-level failure
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub fn for_date(date: NaiveDate, kind: impl ToString) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            date: Some(date),
            kind: Some(kind.to_string()),
            ..Default::default()
        }
    }

    /// Create an error record for a date whose task aborted
    pub fn from_error(date: NaiveDate, error_type: &str, error_message: &str) -> Self {
        RunSummary {
            timestamp: Utc::now(),
            date: Some(date),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    /// Adds `other`'s counts. `unresolved_distinct` is summed too, which
    /// over-counts identifiers seen on several dates; run totals overwrite it
    /// from a merged tally.
    pub fn merge(&mut self, other: &RunSummary) {
        self.timestamp = self.timestamp.max(other.timestamp);
        self.slices_attempted += other.slices_attempted;
        self.slices_missing += other.slices_missing;
        self.fetch_failures += other.fetch_failures;
        self.parse_failures += other.parse_failures;
        self.documents_skipped += other.documents_skipped;
        self.elements_skipped += other.elements_skipped;
        self.records_extracted += other.records_extracted;
        self.rows_loaded += other.rows_loaded;
        self.batches_rejected += other.batches_rejected;
        self.records_rejected += other.records_rejected;
        self.unresolved_occurrences += other.unresolved_occurrences;
        self.unresolved_distinct += other.unresolved_distinct;
    }

    /// Absorbed failures of any category, excluding missing slices.
    pub fn failures(&self) -> usize {
        self.fetch_failures + self.parse_failures + self.batches_rejected
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0 && self.error_type.is_none()
    }

    /// Share of attempted slices that were fetched, as a percentage.
    pub fn fetched_pct(&self) -> f64 {
        let fetched = self
            .slices_attempted
            .saturating_sub(self.slices_missing + self.fetch_failures);
        Self::pct(fetched, self.slices_attempted)
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }
}
