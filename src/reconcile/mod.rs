//! Station identifier reconciliation.
//!
//! Pair-sensor identifiers appear in several textual encodings of the same
//! hyphenated reference identifier. [`ReconcilerIndex::build`] fans each
//! reference row out to its alternate encodings; [`ReconcilerIndex::resolve`]
//! maps any of them back to one canonical station.

mod index;
mod reference;
mod rules;

pub use index::{CanonicalStation, ReconcilerIndex, Resolution, reduce};
pub use reference::{ReferenceError, ReferenceRow, ReferenceTable};
pub use rules::{NativeId, RuleSet};

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::types::PairObservation;

/// A pair observation with each endpoint resolved, or `None` where the raw
/// identifier matched no reference row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciledPair<'a> {
    pub observation: &'a PairObservation,
    pub start: Option<&'a CanonicalStation>,
    pub end: Option<&'a CanonicalStation>,
}

impl ReconciledPair<'_> {
    pub fn is_resolved(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// Counts of raw identifiers that resolved to nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnresolvedTally {
    occurrences: u64,
    distinct: BTreeMap<String, u64>,
}

impl UnresolvedTally {
    /// Records one occurrence; returns `true` the first time `raw` is seen.
    pub fn record(&mut self, raw: &str) -> bool {
        self.occurrences += 1;
        let seen = self.distinct.entry(raw.to_string()).or_insert(0);
        *seen += 1;
        *seen == 1
    }

    pub fn merge(&mut self, other: &UnresolvedTally) {
        self.occurrences += other.occurrences;
        for (raw, count) in &other.distinct {
            *self.distinct.entry(raw.clone()).or_insert(0) += count;
        }
    }

    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    pub fn distinct(&self) -> usize {
        self.distinct.len()
    }

    /// The `n` most frequent identifiers, ties broken alphabetically.
    pub fn most_frequent(&self, n: usize) -> Vec<(&str, u64)> {
        let mut all: Vec<(&str, u64)> = self
            .distinct
            .iter()
            .map(|(raw, count)| (raw.as_str(), *count))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        all.truncate(n);
        all
    }
}

/// Resolves both endpoints of every observation. Every failed endpoint is one
/// occurrence in `tally`; observations are never dropped here.
pub fn reconcile_pairs<'a>(
    observations: &'a [PairObservation],
    index: &'a ReconcilerIndex,
    tally: &mut UnresolvedTally,
) -> Vec<ReconciledPair<'a>> {
    let mut resolve = |raw: &str| {
        let station = index.resolve(raw).station();
        if station.is_none() && tally.record(raw) {
            warn!(raw, "Unresolved station identifier");
        }
        station
    };

    observations
        .iter()
        .map(|observation| ReconciledPair {
            observation,
            start: resolve(&observation.start_station),
            end: resolve(&observation.end_station),
        })
        .collect()
}
