use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::reference::ReferenceTable;
use super::rules::RuleSet;
use crate::types::CanonicalKey;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalStation {
    pub key: CanonicalKey,
    /// Row position in the reference table.
    pub index: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub direction: String,
    pub mileage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Resolved(&'a CanonicalStation),
    Unresolved,
}

impl<'a> Resolution<'a> {
    pub fn station(self) -> Option<&'a CanonicalStation> {
        match self {
            Resolution::Resolved(station) => Some(station),
            Resolution::Unresolved => None,
        }
    }
}

/// Immutable many-to-one map from raw identifier encodings to stations.
///
/// Built once per run and shared read-only by every worker.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerIndex {
    stations: Vec<CanonicalStation>,
    exact: HashMap<String, usize>,
    /// Keyed by the alphanumeric-only, upper-cased reduction of each encoding.
    reduced: HashMap<String, usize>,
    collisions: usize,
}

impl ReconcilerIndex {
    pub fn build(table: &ReferenceTable, rules: &RuleSet) -> Self {
        let mut index = Self::default();

        for (row_number, row) in table.rows().iter().enumerate() {
            let native = row.native_id.trim();
            let duplicate = index
                .exact
                .get(native)
                .is_some_and(|&slot| index.stations[slot].key.as_str() == native);
            if duplicate {
                debug!(native, row = row_number, "Duplicate reference row, keeping first");
                continue;
            }

            let slot = index.stations.len();
            index.stations.push(CanonicalStation {
                key: CanonicalKey::new(native),
                index: row_number,
                latitude: row.latitude,
                longitude: row.longitude,
                direction: row.direction.clone(),
                mileage: row.mileage,
            });

            index.insert(native.to_string(), slot);
            for alternate in rules.alternates(native) {
                index.insert(alternate, slot);
            }
        }

        debug!(
            stations = index.stations.len(),
            encodings = index.exact.len(),
            collisions = index.collisions,
            "Built reconciler index"
        );
        index
    }

    fn insert(&mut self, encoding: String, slot: usize) {
        let reduced = reduce(&encoding);
        let exact_previous = self.exact.insert(encoding.clone(), slot);
        // An encoding without alphanumerics would match every such raw id.
        let reduced_previous = if reduced.is_empty() {
            None
        } else {
            self.reduced.insert(reduced, slot)
        };

        // One flag per encoding even when both maps were claimed.
        if let Some(previous) = [exact_previous, reduced_previous]
            .into_iter()
            .flatten()
            .find(|&previous| previous != slot)
        {
            self.flag_collision(&encoding, previous, slot);
        }
    }

    fn flag_collision(&mut self, encoding: &str, previous: usize, slot: usize) {
        self.collisions += 1;
        warn!(
            encoding,
            previous = %self.stations[previous].key,
            replacement = %self.stations[slot].key,
            "Identifier encoding claimed by two reference rows, last write wins"
        );
    }

    /// Exact match first, then the alphanumeric-only reduction. A raw id
    /// that reduces to nothing only matches exactly.
    pub fn resolve(&self, raw: &str) -> Resolution<'_> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Resolution::Unresolved;
        }
        self.exact
            .get(raw)
            .or_else(|| {
                let reduced = reduce(raw);
                (!reduced.is_empty())
                    .then(|| self.reduced.get(&reduced))
                    .flatten()
            })
            .map(|&slot| Resolution::Resolved(&self.stations[slot]))
            .unwrap_or(Resolution::Unresolved)
    }

    pub fn stations(&self) -> &[CanonicalStation] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Number of distinct encodings in the exact index.
    pub fn encodings(&self) -> usize {
        self.exact.len()
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

/// Strips punctuation and case: `01f-029.3n` becomes `01F0293N`.
pub fn reduce(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
