//! Per-station flow aggregation of pair observations.
//!
//! A pair observation contributes to two groups, one for each endpoint
//! station, keyed by `(bucket, canonical key)`. Each endpoint is a reading
//! of its own, so an unresolved end does not hold back a resolved start.

mod weighted;

pub use weighted::CountWeighted;

use std::collections::BTreeMap;

use crate::reconcile::{ReconciledPair, ReconcilerIndex, UnresolvedTally, reconcile_pairs};
use crate::types::{AggregatedFlowRecord, CanonicalKey, PairObservation, TimeBucket};

/// Aggregated flows plus the identifiers that could not take part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub records: Vec<AggregatedFlowRecord>,
    pub unresolved: UnresolvedTally,
}

/// Reconciles `observations` against `index` and aggregates the result.
pub fn aggregate(observations: &[PairObservation], index: &ReconcilerIndex) -> Aggregation {
    let mut unresolved = UnresolvedTally::default();
    let reconciled = reconcile_pairs(observations, index, &mut unresolved);
    Aggregation {
        records: aggregate_reconciled(&reconciled),
        unresolved,
    }
}

/// Output is sorted by `(bucket, canonical key)`. Unresolved endpoints are
/// skipped one by one.
pub fn aggregate_reconciled(pairs: &[ReconciledPair<'_>]) -> Vec<AggregatedFlowRecord> {
    let mut groups: BTreeMap<(TimeBucket, CanonicalKey), (usize, CountWeighted)> = BTreeMap::new();

    for pair in pairs {
        let obs = pair.observation;
        for station in [pair.start, pair.end].into_iter().flatten() {
            let (_, flow) = groups
                .entry((obs.bucket(), station.key.clone()))
                .or_insert_with(|| (station.index, CountWeighted::default()));
            flow.add(
                u64::from(obs.vehicle_count),
                obs.travel_time_seconds,
                obs.mean_speed,
            );
        }
    }

    groups
        .into_iter()
        .map(|((bucket, canonical_key), (station_index, flow))| AggregatedFlowRecord {
            canonical_key,
            station_index,
            bucket,
            total_vehicle_count: flow.total_count(),
            weighted_travel_time: flow.travel_time(),
            weighted_speed: flow.speed(),
        })
        .collect()
}
