//! Pair-sensor (ETag) documents: per-vehicle-class `Flow` elements under
//! `ETagPairLive` elements keyed by a hyphenated two-station identifier.

use chrono::NaiveDateTime;

use super::Extracted;
use super::xml::{Element, ElementLookup, coerce_f64, coerce_i64};
use crate::aggregate::CountWeighted;
use crate::types::{PairObservation, TimeBucket};

const PAIR_TAGS: [&str; 1] = ["ETagPairLive"];

/// Splits `"01F0293N-01F0325N"` into its two station identifiers.
pub fn split_pair_id(pair_id: &str) -> Option<(&str, &str)> {
    let mut parts = pair_id.split('-').map(str::trim);
    let start = parts.next().filter(|s| !s.is_empty())?;
    let end = parts.next().filter(|s| !s.is_empty())?;
    parts.next().is_none().then_some((start, end))
}

pub(crate) fn extract_pairs(
    root: &Element,
    bucket: TimeBucket,
    update_time: Option<NaiveDateTime>,
) -> Extracted<PairObservation> {
    let mut out = Extracted::new(bucket);

    let Some((lookup, pair_tag)) = ElementLookup::detect(root, &PAIR_TAGS) else {
        return out;
    };

    for pair in lookup.descendants(root, pair_tag) {
        match pair_observation(lookup, pair, bucket, update_time) {
            Some(obs) => out.records.push(obs),
            None => out.skipped += 1,
        }
    }

    out
}

fn pair_observation(
    lookup: ElementLookup,
    pair: &Element,
    bucket: TimeBucket,
    update_time: Option<NaiveDateTime>,
) -> Option<PairObservation> {
    let pair_id = lookup.child_text(pair, "ETagPairID")?;
    let (start, end) = split_pair_id(pair_id)?;

    let mut flows = CountWeighted::default();
    for flow in lookup.descendants(pair, "Flow") {
        let count = coerce_i64(lookup.child_text(flow, "VehicleCount"));
        let travel_time = coerce_f64(lookup.child_text(flow, "TravelTime"));
        let speed = coerce_f64(lookup.child_text(flow, "SpaceMeanSpeed"));

        // Non-positive readings carry no information and would pull the mean to zero.
        if count > 0 && travel_time > 0.0 {
            flows.add(count as u64, travel_time, speed);
        }
    }

    Some(PairObservation {
        update_time,
        pair_id: pair_id.to_string(),
        start_station: start.to_string(),
        end_station: end.to_string(),
        travel_time_seconds: flows.travel_time(),
        mean_speed: flows.speed(),
        vehicle_count: u32::try_from(flows.total_count()).unwrap_or(u32::MAX),
        date: bucket.date,
        hour: bucket.hour,
        minute: bucket.minute,
    })
}
